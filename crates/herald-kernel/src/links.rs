use herald_contracts::{Alert, KeyValue};

const SILENCE_PATH: &str = "/#/silences/new";

/// Exact-match lookup; anything not in `mapping` passes through unchanged.
pub fn map_url(original: &str, mapping: &KeyValue) -> String {
    mapping
        .get(original)
        .cloned()
        .unwrap_or_else(|| original.to_string())
}

/// Deep link into the alert router UI that pre-fills a silence for the
/// alert's label set. Empty when no external URL is known.
pub fn silence_url(alert: &Alert, external_url: &str) -> String {
    if external_url.is_empty() {
        return String::new();
    }
    let base = external_url.strip_suffix('/').unwrap_or(external_url);
    format!("{base}{SILENCE_PATH}{}", silence_filter(&alert.labels))
}

fn silence_filter(labels: &KeyValue) -> String {
    if labels.is_empty() {
        return String::new();
    }
    // BTreeMap iteration is already sorted by key.
    let matchers: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect();
    let expression = format!("{{{}}}", matchers.join(", "));
    let encoded = urlencoding::encode(&expression).replace('+', "%20");
    format!("?filter={encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(pairs: &[(&str, &str)]) -> KeyValue {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn labelled(pairs: &[(&str, &str)]) -> Alert {
        Alert {
            labels: kv(pairs),
            ..Alert::default()
        }
    }

    #[test]
    fn mapped_url_is_replaced() {
        let mapping = kv(&[
            ("alertmanager:9093", "https://alertmanager.example.com"),
            ("alerts:12345", "https://alertmanager.example.com"),
        ]);
        assert_eq!(
            map_url("alertmanager:9093", &mapping),
            "https://alertmanager.example.com"
        );
    }

    #[test]
    fn unmapped_url_passes_through() {
        let mapping = kv(&[("alertmanager:9093", "https://alertmanager.example.com")]);
        assert_eq!(map_url("alerts:12345", &mapping), "alerts:12345");
        assert_eq!(map_url("alerts:12345", &KeyValue::new()), "alerts:12345");
    }

    #[test]
    fn empty_url_stays_empty() {
        let mapping = kv(&[("alertmanager:9093", "https://alertmanager.example.com")]);
        assert_eq!(map_url("", &mapping), "");
        assert_eq!(map_url("", &KeyValue::new()), "");
    }

    #[test]
    fn no_external_url_means_no_link() {
        assert_eq!(silence_url(&labelled(&[("a", "1")]), ""), "");
        assert_eq!(silence_url(&Alert::default(), ""), "");
    }

    #[test]
    fn trailing_slash_is_insignificant() {
        let alert = labelled(&[("something", "value")]);
        assert_eq!(
            silence_url(&alert, "https://x/"),
            silence_url(&alert, "https://x")
        );
        assert_eq!(
            silence_url(&Alert::default(), "example.com/"),
            "example.com/#/silences/new"
        );
        assert_eq!(
            silence_url(&Alert::default(), "example.com"),
            "example.com/#/silences/new"
        );
    }

    #[test]
    fn single_label_filter() {
        assert_eq!(
            silence_url(&labelled(&[("something", "value")]), "example.com"),
            "example.com/#/silences/new?filter=%7Bsomething%3D%22value%22%7D"
        );
    }

    #[test]
    fn labels_are_sorted_and_spaces_percent_encoded() {
        let alert = labelled(&[("something", "value"), ("else", "other"), ("more", "labels")]);
        assert_eq!(
            silence_url(&alert, "example.com"),
            "example.com/#/silences/new?filter=%7Belse%3D%22other%22%2C%20more%3D%22labels%22%2C%20something%3D%22value%22%7D"
        );
    }

    #[test]
    fn filter_keys_ordered_regardless_of_insertion() {
        let mut labels = KeyValue::new();
        labels.insert("b".to_string(), "2".to_string());
        labels.insert("a".to_string(), "1".to_string());
        let url = silence_url(
            &Alert {
                labels,
                ..Alert::default()
            },
            "http://am",
        );
        assert!(url.ends_with("?filter=%7Ba%3D%221%22%2C%20b%3D%222%22%7D"), "{url}");
    }

    #[test]
    fn filter_decodes_back_to_expression() {
        let alert = labelled(&[("job", "node exporter"), ("sev", "a+b")]);
        let url = silence_url(&alert, "http://am:9093");
        let encoded = url.split_once("?filter=").map(|(_, f)| f).unwrap();
        assert!(!encoded.contains('+'));
        let decoded = urlencoding::decode(encoded).unwrap();
        assert_eq!(decoded, r#"{job="node exporter", sev="a+b"}"#);
    }
}

//! Pure alert rendering: computed values, URL mapping, silence links and
//! the firing/resolved templates. Nothing here performs I/O.

mod links;
mod template;
mod values;

pub use links::{map_url, silence_url};
pub use template::{
    RenderError, RenderSettings, Renderer, TemplateError, TemplateRenderer, TemplateSpec,
};
pub use values::{resolve_values, ComputedValueRule};

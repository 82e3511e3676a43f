//! Where the single user-visible outcome of a run ends up.

use std::fmt::Write as _;

/// Shown instead of the values when the result is too long to render.
pub const DONE_PLACEHOLDER: &str = "Done. See console for the full result.";

/// What a run shows the user.  Exactly one of these is presented per run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Presentation<'a> {
    Diagnostic(&'a str),
    Values(&'a [f32]),
    Placeholder(&'a str),
}

/// A text region that displays the outcome of a run.
pub trait OutputSink {
    fn present(&mut self, presentation: Presentation<'_>);
}

/// Render values comma-separated with no spaces, each through `f32`'s
/// `Display`: the shortest digits that round-trip, integral values
/// without a fraction.
///
/// Small integral results read the same as a browser `Float32Array`,
/// but there is no exponent notation (`1e30` prints all 31 digits) and
/// negative zero keeps its sign.  Non-finite values print as `inf` and
/// `NaN`.
pub fn render_values(values: &[f32]) -> String {
    let mut text = String::with_capacity(values.len() * 4);
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            text.push(',');
        }
        let _ = write!(text, "{value}");
    }
    text
}

/// Writes the outcome to stdout, diagnostics to stderr.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn present(&mut self, presentation: Presentation<'_>) {
        match presentation {
            Presentation::Diagnostic(message) => eprintln!("{message}"),
            Presentation::Values(values) => println!("{}", render_values(values)),
            Presentation::Placeholder(message) => println!("{message}"),
        }
    }
}

/// In-memory text region.  Each presentation replaces the previous text.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TextSurface {
    text: String,
    presentations: usize,
}

impl TextSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// How many times something was presented.
    pub fn presentations(&self) -> usize {
        self.presentations
    }
}

impl OutputSink for TextSurface {
    fn present(&mut self, presentation: Presentation<'_>) {
        self.text = match presentation {
            Presentation::Diagnostic(message) | Presentation::Placeholder(message) => {
                message.to_string()
            }
            Presentation::Values(values) => render_values(values),
        };
        self.presentations += 1;
    }
}

/// Width of rendered text, in pixels.
pub trait TextMeasure {
    fn width(&self, text: &str) -> f32;
}

/// Every glyph has the same advance.
#[derive(Debug, Clone, Copy)]
pub struct MonospaceMeasure {
    pub glyph_width_px: f32,
}

impl TextMeasure for MonospaceMeasure {
    fn width(&self, text: &str) -> f32 {
        text.chars().count() as f32 * self.glyph_width_px
    }
}

impl<F> TextMeasure for F
where
    F: Fn(&str) -> f32,
{
    fn width(&self, text: &str) -> f32 {
        self(text)
    }
}

/// Greedy word wrap into pages of at most `max_lines` lines.
///
/// Embedded newlines always end a line. A word wider than `max_width_px` gets a line to itself
/// rather than being split. Whitespace-only input yields no pages.
pub fn paginate(
    text: &str,
    max_width_px: f32,
    max_lines: usize,
    measure: &dyn TextMeasure,
) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut lines: Vec<String> = Vec::new();
    for paragraph in text.trim().split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            if line.is_empty() {
                line.push_str(word);
                continue;
            }
            let candidate = format!("{line} {word}");
            if measure.width(&candidate) <= max_width_px {
                line = candidate;
            } else {
                lines.push(std::mem::replace(&mut line, word.to_string()));
            }
        }
        lines.push(line);
    }

    lines
        .chunks(max_lines.max(1))
        .map(|chunk| chunk.join("\n"))
        .collect()
}

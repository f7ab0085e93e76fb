//! Reply text normalisation for WhatsApp.

use regex::Regex;
use std::sync::OnceLock;

fn annotation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Spaces and tabs before the annotation go with it; line breaks stay.
    RE.get_or_init(|| Regex::new(r"[ \t]*【.*?】").expect("valid annotation regex"))
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid bold regex"))
}

/// Strip 【…】 citation markers and rewrite `**bold**` as WhatsApp's `*bold*`.
pub fn format_for_whatsapp(text: &str) -> String {
    let stripped = annotation_re().replace_all(text, "");
    bold_re().replace_all(stripped.trim(), "*$1*").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_citations_and_converts_bold() {
        assert_eq!(format_for_whatsapp("Hello 【1】 **world**"), "Hello *world*");
    }

    #[test]
    fn citations_anywhere() {
        assert_eq!(
            format_for_whatsapp("【4:0†source】Opening hours are 9-5【4:1†source】."),
            "Opening hours are 9-5."
        );
    }

    #[test]
    fn paragraph_breaks_survive_citations() {
        assert_eq!(
            format_for_whatsapp("Our hours:\n\n【4:0†source】Mon-Fri 9-5"),
            "Our hours:\n\nMon-Fri 9-5"
        );
        assert_eq!(
            format_for_whatsapp("First line 【1】\nSecond line"),
            "First line\nSecond line"
        );
    }

    #[test]
    fn multiple_bold_spans_are_lazy() {
        assert_eq!(
            format_for_whatsapp("**a** and **b**"),
            "*a* and *b*"
        );
    }

    #[test]
    fn plain_text_untouched() {
        assert_eq!(format_for_whatsapp("  just text *already* "), "just text *already*");
    }
}

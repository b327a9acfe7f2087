//! Composition of simultaneous captions.

use reelkit_timeline_model::{TextSpan, VAlign};
use serde::{Deserialize, Serialize};

/// Vertical positions closer than this render as one block.
pub const TEXT_POSITION_EPSILON: f64 = 0.01;

/// Captions rendered together as one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUnit {
    pub v_align: VAlign,
    pub v_position: f64,
    /// Lines in playlist order.
    pub lines: Vec<String>,
}

/// Group simultaneously active spans into rendering units.
///
/// Spans sharing vertical alignment and position (within
/// [`TEXT_POSITION_EPSILON`]) are stacked into one unit. Units with different
/// alignment are placed independently and may collide on screen; no
/// collision avoidance is attempted.
pub fn compose_text(spans: &[TextSpan]) -> Vec<TextUnit> {
    let mut units: Vec<TextUnit> = vec![];
    for span in spans {
        let existing = units.iter_mut().find(|u| {
            u.v_align == span.v_align
                && (u.v_position - span.v_position).abs() < TEXT_POSITION_EPSILON
        });
        match existing {
            Some(unit) => unit.lines.push(span.text.clone()),
            None => units.push(TextUnit {
                v_align: span.v_align,
                v_position: span.v_position,
                lines: vec![span.text.clone()],
            }),
        }
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelkit_common::time::ContentTime;

    fn span(text: &str, v_align: VAlign, v_position: f64) -> TextSpan {
        TextSpan {
            from: ContentTime::ZERO,
            to: ContentTime::from_seconds(1.0),
            text: text.to_string(),
            v_align,
            v_position,
        }
    }

    #[test]
    fn test_matching_alignment_grouped() {
        let units = compose_text(&[
            span("first", VAlign::Bottom, 0.1),
            span("second", VAlign::Bottom, 0.105),
        ]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].lines, vec!["first", "second"]);
    }

    #[test]
    fn test_differing_alignment_independent() {
        let units = compose_text(&[
            span("bottom", VAlign::Bottom, 0.1),
            span("top", VAlign::Top, 0.1),
            span("higher", VAlign::Bottom, 0.2),
        ]);
        assert_eq!(units.len(), 3);
        assert_eq!(units[1].v_align, VAlign::Top);
    }

    #[test]
    fn test_empty() {
        assert!(compose_text(&[]).is_empty());
    }
}

//! Section detection over streamed model output.

use legal_mcp_types::ProgressEvent;

/// A section heading the model is instructed to produce.
struct SectionMarker {
    /// Uppercase text searched for in each fragment
    marker: &'static str,
    label: &'static str,
    message: &'static str,
}

/// Markers in priority order; the first one found in a fragment wins.
const SECTION_MARKERS: [SectionMarker; 4] = [
    SectionMarker {
        marker: "EXECUTIVE SUMMARY",
        label: "Executive Summary",
        message: "Analyzing executive summary...",
    },
    SectionMarker {
        marker: "DETAILED ANALYSIS",
        label: "Detailed Analysis",
        message: "Performing detailed analysis...",
    },
    SectionMarker {
        marker: "RISK ASSESSMENT",
        label: "Risk Assessment",
        message: "Assessing risks...",
    },
    SectionMarker {
        marker: "RECOMMENDATIONS",
        label: "Recommendations",
        message: "Generating recommendations...",
    },
];

/// Outcome of classifying one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Section label in effect after this fragment
    pub section: String,
    /// Events to emit, in order
    pub events: Vec<ProgressEvent>,
}

/// Classify one streamed fragment against the section currently in effect.
///
/// Emits `SectionStarted` only when the fragment moves the run into a
/// different section, followed by exactly one `ContentChunk` carrying the
/// fragment verbatim. Headings split across fragments are not detected.
pub fn classify(fragment: &str, current_section: &str) -> Classification {
    let normalized = fragment.to_uppercase();
    let mut events = Vec::with_capacity(2);

    let section = match SECTION_MARKERS
        .iter()
        .find(|m| normalized.contains(m.marker))
    {
        Some(m) if m.label != current_section => {
            events.push(ProgressEvent::SectionStarted {
                section: m.label.to_string(),
                message: m.message.to_string(),
            });
            m.label.to_string()
        }
        _ => current_section.to_string(),
    };

    events.push(ProgressEvent::ContentChunk {
        section: section.clone(),
        chunk: fragment.to_string(),
    });

    Classification { section, events }
}

use regex::Regex;
use serde::Serialize;

/// Free-text feedback split into display sections. Sentences that match no
/// keyword land in `suggestions`; classification is heuristic and never
/// feeds back into score aggregation.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FeedbackSections {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
    pub resources: Vec<String>,
}

impl FeedbackSections {
    /// Collapses the buckets into the three stored feedback fields;
    /// suggestions ride along with resources so nothing is dropped.
    pub fn to_feedback_fields(&self) -> (String, String, String) {
        let mut resources: Vec<String> = self.resources.clone();
        resources.extend(self.suggestions.iter().cloned());
        (
            self.strengths.join(" "),
            self.weaknesses.join(" "),
            resources.join(" "),
        )
    }
}

struct Sectioner {
    strengths: Regex,
    weaknesses: Regex,
    resources: Regex,
}

impl Sectioner {
    fn new() -> Self {
        Self {
            strengths: Regex::new(
                r"(?i)\b(strength|strong|well[- ]done|excellent|great|good|impressive|solid|clear)\b",
            )
            .expect("strengths pattern"),
            weaknesses: Regex::new(
                r"(?i)\b(weakness|weak|improve|improvement|lacking|missing|incomplete|issue|problem|error|incorrect|fail(s|ed|ing)?)\b",
            )
            .expect("weaknesses pattern"),
            resources: Regex::new(
                r"(?i)\b(resource|reference|read|documentation|docs|tutorial|course|material|chapter|lecture|link)\b",
            )
            .expect("resources pattern"),
        }
    }

    fn classify(&self, sentence: &str) -> Bucket {
        if self.strengths.is_match(sentence) {
            Bucket::Strengths
        } else if self.weaknesses.is_match(sentence) {
            Bucket::Weaknesses
        } else if self.resources.is_match(sentence) {
            Bucket::Resources
        } else {
            Bucket::Suggestions
        }
    }
}

enum Bucket {
    Strengths,
    Weaknesses,
    Suggestions,
    Resources,
}

pub fn section_feedback(text: &str) -> FeedbackSections {
    let sectioner = Sectioner::new();
    let mut out = FeedbackSections::default();

    for sentence in split_sentences(text) {
        match sectioner.classify(&sentence) {
            Bucket::Strengths => out.strengths.push(sentence),
            Bucket::Weaknesses => out.weaknesses.push(sentence),
            Bucket::Suggestions => out.suggestions.push(sentence),
            Bucket::Resources => out.resources.push(sentence),
        }
    }

    out
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    for ch in text.chars() {
        match ch {
            '.' | '!' | '?' => {
                buf.push(ch);
                let t = buf.trim();
                if !t.is_empty() {
                    out.push(t.to_string());
                }
                buf.clear();
            }
            '\n' => {
                let t = buf.trim();
                if !t.is_empty() {
                    out.push(t.to_string());
                }
                buf.clear();
            }
            _ => buf.push(ch),
        }
    }
    let t = buf.trim();
    if !t.is_empty() {
        out.push(t.to_string());
    }
    out
}

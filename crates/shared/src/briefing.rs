use chrono::NaiveDate;
use serde::Serialize;

use crate::config::SectionKind;
use crate::summarizer::SectionResult;

/// An image carried inside the email and referenced as `cid:<content_id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub content_id: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SectionOutcome {
    Ready { result: SectionResult },
    /// The section had content but no usable summary
    Degraded { reason: String },
    /// Nothing was collected for the section
    Empty,
}

#[derive(Debug, Clone)]
pub struct BriefingSection {
    pub name: String,
    pub kind: SectionKind,
    pub outcome: SectionOutcome,
    pub image: Option<InlineImage>,
}

#[derive(Debug, Clone)]
pub struct Briefing {
    /// Eastern calendar date the briefing is for
    pub date: NaiveDate,
    pub sections: Vec<BriefingSection>,
    pub charts: Vec<InlineImage>,
}

impl Briefing {
    pub fn subject(&self) -> String {
        format!("Daily Briefing - {}", self.date.format("%A, %B %d, %Y"))
    }

    /// Every image the rendered HTML references
    pub fn inline_images(&self) -> Vec<&InlineImage> {
        self.sections
            .iter()
            .filter(|s| matches!(s.outcome, SectionOutcome::Ready { .. }))
            .filter_map(|s| s.image.as_ref())
            .chain(self.charts.iter())
            .collect()
    }
}

pub struct BriefingGenerator;

impl BriefingGenerator {
    pub fn generate(briefing: &Briefing) -> String {
        let mut html = String::new();

        let formatted_date = briefing.date.format("%A, %B %-d, %Y").to_string();

        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
        html.push_str("  <meta charset=\"UTF-8\">\n");
        html.push_str(&format!(
            "  <title>{}</title>\n",
            escape_html(&briefing.subject())
        ));
        html.push_str("  <style>\n");
        html.push_str("    body { font-family: Arial, sans-serif; max-width: 700px; margin: 20px auto; padding: 0 16px; line-height: 1.6; color: #222; }\n");
        html.push_str("    h1 { color: #1e3d59; border-bottom: 3px solid #1e3d59; padding-bottom: 8px; text-align: center; }\n");
        html.push_str("    h1 .date { display: block; font-size: 0.6em; font-weight: normal; color: #555; }\n");
        html.push_str("    h2 { color: #1e3d59; margin: 32px 0 8px 0; padding: 6px 10px; background-color: #f0f4f8; border-left: 4px solid #1e3d59; }\n");
        html.push_str("    img.illustration { width: 100%; border-radius: 4px; margin: 8px 0; }\n");
        html.push_str("    img.chart { width: 100%; margin: 4px 0 12px 0; }\n");
        html.push_str("    .chart-caption { margin: 12px 0 0 0; font-weight: bold; color: #1e3d59; }\n");
        html.push_str("    ul { margin: 10px 0; padding-left: 20px; }\n");
        html.push_str("    li { margin: 10px 0; }\n");
        html.push_str("    .source { color: #7f8c8d; font-size: 0.9em; }\n");
        html.push_str("    .source a { color: #1e3d59; }\n");
        html.push_str("    .error { color: #e74c3c; font-style: italic; }\n");
        html.push_str("  </style>\n");
        html.push_str("</head>\n<body>\n");

        html.push_str(&format!(
            "<h1>Daily Briefing<span class=\"date\">{}</span></h1>\n",
            formatted_date
        ));

        for section in &briefing.sections {
            let result = match &section.outcome {
                SectionOutcome::Empty => continue,
                SectionOutcome::Degraded { .. } => None,
                SectionOutcome::Ready { result } => Some(result),
            };

            html.push_str(&format!("<h2>{}</h2>\n", escape_html(&section.name)));

            let Some(result) = result else {
                html.push_str("<p class=\"error\">Summary not available</p>\n");
                continue;
            };

            if let Some(image) = &section.image {
                html.push_str(&format!(
                    "<img class=\"illustration\" src=\"cid:{}\" alt=\"{}\">\n",
                    escape_html(&image.content_id),
                    escape_html(&image.alt)
                ));
            }

            html.push_str("<ul>\n");
            match result {
                SectionResult::Articles(bullets) => {
                    for b in bullets {
                        html.push_str(&format!(
                            "  <li><strong>{}</strong> {} <span class=\"source\">(<a href=\"{}\">{}</a>)</span></li>\n",
                            escape_html(&b.headline),
                            escape_html(&b.one_sentence_summary),
                            escape_html(&b.url),
                            escape_html(&b.source_name)
                        ));
                    }
                }
                SectionResult::Emails(bullets) => {
                    for b in bullets {
                        html.push_str(&format!(
                            "  <li><strong>{}</strong> {} <span class=\"source\">({}, &ldquo;{}&rdquo;)</span></li>\n",
                            escape_html(&b.headline),
                            escape_html(&b.one_sentence_summary),
                            escape_html(&b.sender),
                            escape_html(&b.subject)
                        ));
                    }
                }
            }
            html.push_str("</ul>\n");
        }

        if !briefing.charts.is_empty() {
            html.push_str("<h2>Markets</h2>\n");
            for chart in &briefing.charts {
                html.push_str(&format!(
                    "<p class=\"chart-caption\">{}</p>\n",
                    escape_html(&chart.alt)
                ));
                html.push_str(&format!(
                    "<img class=\"chart\" src=\"cid:{}\" alt=\"{}\">\n",
                    escape_html(&chart.content_id),
                    escape_html(&chart.alt)
                ));
            }
        }

        html.push_str("</body>\n</html>");
        html
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::{ArticleBullet, EmailBullet};

    fn image(id: &str) -> InlineImage {
        InlineImage {
            content_id: id.to_string(),
            mime_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
            alt: "alt".to_string(),
        }
    }

    fn briefing() -> Briefing {
        Briefing {
            date: NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(),
            sections: vec![
                BriefingSection {
                    name: "Alternative Protein".to_string(),
                    kind: SectionKind::Articles,
                    outcome: SectionOutcome::Ready {
                        result: SectionResult::Articles(vec![ArticleBullet {
                            headline: "Oatly <Beats> Estimates".to_string(),
                            one_sentence_summary: "Sales rose.".to_string(),
                            source_name: "Vegconomist".to_string(),
                            url: "https://vegconomist.com/a?x=1&y=2".to_string(),
                        }]),
                    },
                    image: Some(image("section-0")),
                },
                BriefingSection {
                    name: "Vegan Movement".to_string(),
                    kind: SectionKind::Emails,
                    outcome: SectionOutcome::Ready {
                        result: SectionResult::Emails(vec![EmailBullet {
                            headline: "Cage-Free Win".to_string(),
                            one_sentence_summary: "A retailer committed.".to_string(),
                            sender: "Ana".to_string(),
                            subject: "Big win".to_string(),
                        }]),
                    },
                    image: None,
                },
                BriefingSection {
                    name: "Effective Altruism".to_string(),
                    kind: SectionKind::Articles,
                    outcome: SectionOutcome::Degraded {
                        reason: "validation".to_string(),
                    },
                    image: None,
                },
                BriefingSection {
                    name: "AI".to_string(),
                    kind: SectionKind::Articles,
                    outcome: SectionOutcome::Empty,
                    image: Some(image("unused")),
                },
            ],
            charts: vec![InlineImage {
                alt: "S&P 500: 6050.25 (+3.1% over 1y)".to_string(),
                ..image("chart-0")
            }],
        }
    }

    // ==================== HTML Generation Tests ====================

    #[test]
    fn test_subject_uses_long_date() {
        assert_eq!(briefing().subject(), "Daily Briefing - Tuesday, February 03, 2026");
    }

    #[test]
    fn test_generate_renders_sections_in_order() {
        let html = BriefingGenerator::generate(&briefing());
        let ap = html.find("<h2>Alternative Protein</h2>").unwrap();
        let vm = html.find("<h2>Vegan Movement</h2>").unwrap();
        let ea = html.find("<h2>Effective Altruism</h2>").unwrap();
        assert!(ap < vm && vm < ea);
        assert!(html.contains("Tuesday, February 3, 2026"));
    }

    #[test]
    fn test_generate_escapes_and_links() {
        let html = BriefingGenerator::generate(&briefing());
        assert!(html.contains("Oatly &lt;Beats&gt; Estimates"));
        assert!(html.contains("href=\"https://vegconomist.com/a?x=1&amp;y=2\""));
        assert!(html.contains("(Ana, &ldquo;Big win&rdquo;)"));
    }

    #[test]
    fn test_generate_degraded_and_empty_sections() {
        let html = BriefingGenerator::generate(&briefing());
        assert_eq!(html.matches("Summary not available").count(), 1);
        assert!(!html.contains("<h2>AI</h2>"));
        assert!(!html.contains("cid:unused"));
    }

    #[test]
    fn test_generate_inline_images() {
        let b = briefing();
        let html = BriefingGenerator::generate(&b);
        assert!(html.contains("src=\"cid:section-0\""));
        assert!(html.contains("<h2>Markets</h2>"));
        assert!(html.contains("src=\"cid:chart-0\""));
        let caption = html
            .find("<p class=\"chart-caption\">S&amp;P 500: 6050.25 (+3.1% over 1y)</p>")
            .unwrap();
        assert!(caption < html.find("src=\"cid:chart-0\"").unwrap());

        let ids: Vec<&str> = b.inline_images().iter().map(|i| i.content_id.as_str()).collect();
        assert_eq!(ids, vec!["section-0", "chart-0"]);
    }

    // ==================== HTML Escaping Tests ====================

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<a href=\"x\">Tom & Jerry's</a>"),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }
}

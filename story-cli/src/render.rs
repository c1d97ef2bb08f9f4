use story_core::RenderBlock;
use url::Url;

const WIDTH: usize = 80;

/// Flattens rendered blocks into terminal lines.
pub fn blocks_to_text(blocks: &[RenderBlock], media_base: &Url) -> Vec<String> {
    let mut lines = Vec::new();
    for block in blocks {
        match block {
            RenderBlock::Paragraph { text } => lines.push(text.clone()),
            RenderBlock::Spacer => lines.push(String::new()),
            RenderBlock::Markup { html } => {
                lines.extend(
                    html2text::from_read(html.as_bytes(), WIDTH)
                        .lines()
                        .map(str::to_string),
                );
            }
            RenderBlock::PromptCallout { text } => {
                lines.push(format!("  ┌ illustration to come: {text}"));
            }
            RenderBlock::Image { illustration } => {
                let target = match illustration.resolve_url(media_base) {
                    Ok(Some(url)) => url.to_string(),
                    Ok(None) => "(inline image)".to_string(),
                    Err(e) => format!("(unresolvable path: {e})"),
                };
                lines.push(format!("  [image] {target}"));
            }
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use story_core::Illustration;

    #[test]
    fn images_resolve_against_media_base() {
        let base = Url::parse("https://media.example.com/").unwrap();
        let blocks = vec![
            RenderBlock::Markup {
                html: "<p>A <em>bold</em> fox.</p>".into(),
            },
            RenderBlock::Image {
                illustration: Illustration {
                    id: Some(3),
                    image_path: Some("uploads/7/fox.png".into()),
                    ..Illustration::pending(7, 0)
                },
            },
        ];
        let lines = blocks_to_text(&blocks, &base);
        assert!(lines[0].contains("fox."));
        assert_eq!(
            lines.last().unwrap(),
            "  [image] https://media.example.com/uploads/7/fox.png"
        );
    }

    #[test]
    fn legacy_text_is_printed_verbatim() {
        let base = Url::parse("https://media.example.com/").unwrap();
        let blocks = story_core::render("If a<b and c>d, Tom & Jerry win.", &[]);
        let lines = blocks_to_text(&blocks, &base);
        assert_eq!(lines, vec!["If a<b and c>d, Tom & Jerry win."]);
    }
}

//! Turns a validated `ContentItem` into a channel-specific `ContentArtifact`
//! (§4.2). Rendering is pure and side-effect-free; the actual network call
//! lives in the channel `Publisher`, not here.

use distro_types::{Channel, ContentArtifact, ContentItem, Renderer};

use crate::tone::{personalize, resolve_tone};

pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for TemplateRenderer {
    fn render(
        &self,
        item: &ContentItem,
        channel: Channel,
        _template: Option<&str>,
    ) -> anyhow::Result<ContentArtifact> {
        let tone = resolve_tone(item, channel);
        let hashtags: Vec<String> = item.tags.iter().map(|t| format!("#{t}")).collect();
        let link = Some(format!("https://example.com/updates/{}", item.id));

        let (subject, body) = match channel {
            Channel::Email => (Some(item.title.clone()), personalize(tone, &item.body)),
            Channel::Web => (None, personalize(tone, &item.body)),
            Channel::SocialTwitter | Channel::SocialLinkedIn | Channel::SocialFacebook => {
                (None, personalize(tone, &format!("{}\n\n{}", item.title, item.body)))
            }
        };

        Ok(ContentArtifact {
            channel,
            content_id: item.id.clone(),
            subject,
            body,
            hashtags,
            link,
            media: Vec::new(),
        })
    }
}

//! Tone personalization applied before rendering (§4.2, §4.5).
//!
//! A pure function of `(Tone, Channel)`: LinkedIn/Facebook default to
//! professional/community tone respectively when the item doesn't specify
//! one, everything else defaults to neutral. This module never mutates a
//! `ContentItem`; it only decides which `Tone` a render should use.

use distro_types::{Channel, ContentItem, Tone};

/// Resolves the effective tone for rendering `item` on `channel`, applying
/// channel defaults when the item leaves tone unset.
pub fn resolve_tone(item: &ContentItem, channel: Channel) -> Tone {
    if let Some(tone) = item.tone {
        return tone;
    }
    match channel {
        Channel::SocialLinkedIn => Tone::Professional,
        Channel::SocialFacebook => Tone::Community,
        Channel::SocialTwitter => Tone::Casual,
        Channel::Email | Channel::Web => Tone::Neutral,
    }
}

/// Applies a light touch of tone-appropriate framing to a line of copy.
/// Real copy tone is a rendering/template concern; this is the minimal
/// personalization step (no content rewriting).
pub fn personalize(tone: Tone, text: &str) -> String {
    match tone {
        Tone::Urgent => format!("{} \u{2014} act now", text),
        Tone::Professional | Tone::Community | Tone::Casual | Tone::Neutral => text.to_string(),
    }
}

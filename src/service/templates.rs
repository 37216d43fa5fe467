// service/templates.rs
pub const LINK_PLACEHOLDER: &str = "[REFERRAL_LINK]";

pub const EMAIL_SUBJECT: &str = "You’re invited to try the Carton Caps app!";

pub const EMAIL_BODY: &str = "Hey!\n\n\
Join me in earning cash for our school by using the Carton Caps app. \
It's an easy way to make a difference. All you have to do is buy Carton Caps participating products \
(like Cheerios!) and scan your grocery receipt. Carton Caps are worth $.10 each and they add up fast! \
Twice a year, our school receives a check to help pay for whatever we need - equipment, supplies \
or experiences the kids love!\n\n\
Download the Carton Caps app here: [REFERRAL_LINK]\n";

pub const SMS_BODY: &str = "Hi! Join me in earning money for our school using the Carton Caps app. \
It's an easy way to make a difference. \
Use the link below to download the Carton Caps app: [REFERRAL_LINK]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub message: String,
}

/// Email gets a subject and the long body, every other channel the short body.
pub fn render(channel: &str, link: &str) -> RenderedMessage {
    if channel == "email" {
        RenderedMessage {
            subject: Some(EMAIL_SUBJECT.to_string()),
            message: EMAIL_BODY.replace(LINK_PLACEHOLDER, link),
        }
    } else {
        RenderedMessage {
            subject: None,
            message: SMS_BODY.replace(LINK_PLACEHOLDER, link),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_has_subject_and_link() {
        let rendered = render("email", "https://cartoncaps.link/abc?ref=XY7G4D");
        assert_eq!(rendered.subject.as_deref(), Some(EMAIL_SUBJECT));
        assert!(rendered.message.contains("https://cartoncaps.link/abc?ref=XY7G4D"));
        assert!(!rendered.message.contains(LINK_PLACEHOLDER));
    }

    #[test]
    fn other_channels_are_body_only() {
        for channel in ["sms", "generic"] {
            let rendered = render(channel, "https://l.test/x");
            assert!(rendered.subject.is_none());
            assert!(rendered.message.ends_with("https://l.test/x"));
        }
    }
}

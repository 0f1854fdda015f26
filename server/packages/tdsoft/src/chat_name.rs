//! Light, format-only classification of chat references. Whether the chat
//! actually exists is for the worker to find out.

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatNameKind {
    /// Empty or unrecognised.
    Empty,
    Username,
    InviteLink,
    ChatId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatName {
    pub kind: ChatNameKind,
    /// Cleaned form; empty when `kind` is [`ChatNameKind::Empty`].
    pub value: String,
}

impl ChatName {
    fn empty() -> Self {
        Self {
            kind: ChatNameKind::Empty,
            value: String::new(),
        }
    }

    fn new(kind: ChatNameKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind == ChatNameKind::Empty
    }
}

/// `@?[A-Za-z0-9_]{4,32}`
pub fn is_valid_username(input: &str) -> bool {
    let input = input.trim();
    let name = input.strip_prefix('@').unwrap_or(input);
    (4..=32).contains(&name.len())
        && name
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
}

/// Sorts `input` into a username, a numeric chat id, a `t.me` invite link or
/// nothing. `t.me/<username>` links classify as the bare username.
pub fn classify(input: &str) -> ChatName {
    let chat = input.trim();
    if chat.is_empty() || chat.starts_with('0') {
        return ChatName::empty();
    }

    let (negative, digits) = match chat.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, chat),
    };
    if digits.is_empty() {
        return ChatName::empty();
    }
    if matches!(digits.parse::<i64>(), Ok(id) if id > 0) {
        return ChatName::new(ChatNameKind::ChatId, chat);
    }
    if negative {
        return ChatName::empty();
    }

    if is_valid_username(chat) {
        return ChatName::new(ChatNameKind::Username, chat);
    }
    if chat.starts_with('@') {
        return ChatName::empty();
    }

    classify_link(chat)
}

fn classify_link(chat: &str) -> ChatName {
    let mut link = if chat.contains("://") {
        chat.to_string()
    } else {
        format!("https://{chat}")
    };
    let Ok(url) = Url::parse(&link) else {
        return ChatName::empty();
    };
    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
        _ => return ChatName::empty(),
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host != "t.me" && host != "telegram.me" {
        return ChatName::empty();
    }

    let mut path = url.path().trim_start_matches('/').to_ascii_lowercase();
    if path.is_empty() {
        return ChatName::empty();
    }
    if path.ends_with('/') {
        path.pop();
        if link.ends_with('/') {
            link.pop();
        }
    }
    let slashes = path.matches('/').count();

    if let Some(token) = path.strip_prefix('+') {
        if token.is_empty() || slashes > 0 {
            return ChatName::empty();
        }
        return ChatName::new(ChatNameKind::InviteLink, link);
    }
    if let Some(token) = path.strip_prefix("joinchat/") {
        if token.is_empty() || slashes > 1 {
            return ChatName::empty();
        }
        return ChatName::new(ChatNameKind::InviteLink, link);
    }
    if slashes > 0 {
        return ChatName::empty();
    }
    if !path.starts_with('@') && is_valid_username(&path) {
        return ChatName::new(ChatNameKind::Username, path);
    }
    ChatName::empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(input: &str) -> ChatNameKind {
        classify(input).kind
    }

    #[test]
    fn usernames() {
        assert_eq!(classify("@durov"), ChatName::new(ChatNameKind::Username, "@durov"));
        assert_eq!(kind("  durov_channel "), ChatNameKind::Username);
        assert_eq!(kind("abc"), ChatNameKind::Empty);
        assert_eq!(kind("@bad-name"), ChatNameKind::Empty);
        assert!(!is_valid_username(&"a".repeat(33)));
    }

    #[test]
    fn chat_ids() {
        assert_eq!(kind("123456"), ChatNameKind::ChatId);
        assert_eq!(
            classify("-1001234567890"),
            ChatName::new(ChatNameKind::ChatId, "-1001234567890")
        );
        assert_eq!(kind("0123"), ChatNameKind::Empty);
        assert_eq!(kind("-"), ChatNameKind::Empty);
        assert_eq!(kind("-abc"), ChatNameKind::Empty);
    }

    #[test]
    fn links() {
        assert_eq!(
            classify("https://t.me/durov/"),
            ChatName::new(ChatNameKind::Username, "durov")
        );
        assert_eq!(kind("t.me/DurovChannel"), ChatNameKind::Username);
        assert_eq!(kind("www.telegram.me/durov"), ChatNameKind::Username);
        assert_eq!(
            classify("t.me/+AbCdEf123"),
            ChatName::new(ChatNameKind::InviteLink, "https://t.me/+AbCdEf123")
        );
        assert_eq!(kind("https://t.me/joinchat/AbCdEf"), ChatNameKind::InviteLink);
        assert_eq!(kind("https://t.me/+"), ChatNameKind::Empty);
        assert_eq!(kind("https://t.me/durov/42"), ChatNameKind::Empty);
        assert_eq!(kind("https://example.com/durov"), ChatNameKind::Empty);
        assert_eq!(kind("https://t.me/"), ChatNameKind::Empty);
    }

    #[test]
    fn blanks() {
        assert!(classify("").is_empty());
        assert!(classify("   ").is_empty());
        assert!(classify("??").is_empty());
    }
}

//! Message cleanup: markup, links, handles, channel boilerplate and
//! emoji-only lines are removed while the line structure is kept.

use std::sync::LazyLock;

use regex::Regex;

static RE_MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*~]+|_{2,}|`+").unwrap());
static RE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(?:https?://|www\.|t\.me/)\S*").unwrap());
static RE_HANDLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\w+").unwrap());
/// Invisible fillers plus emoji variation selectors, keycaps and skin tones.
static RE_FILLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\u{3164}\u{200B}-\u{200D}\u{2060}\u{FEFF}\u{2800}\u{00AD}\u{FE0E}\u{FE0F}\u{20E3}\u{1F3FB}-\u{1F3FF}]")
        .unwrap()
});
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Channel signatures, subscription calls and "nothing happening" lines.
static RE_BOILERPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        підписатися | підпишись | підписуйтесь | ппошник | моніторинг\s*24/7
        | радар\s+україни | напрямок\s+ракет | карта\s+повітряних\s+тривог
        | не\s+фіксується | загроза\s+для\s+.*\bр-?в | передмісті\s+чисто
        | ^\s*чисто\s*[.!]?\s*$ | наш\s+канал | реклама | донат | підтримати\s+канал",
    )
    .unwrap()
});

/// Clean one line; returns an empty string for lines that carry nothing.
fn clean_line(line: &str) -> String {
    let mut current = line.to_string();
    // Stripping can expose new runs (e.g. `*_*_*`); iterate to a fixpoint so
    // a second pass never changes anything.
    loop {
        let s = RE_FILLER.replace_all(&current, "");
        let s = RE_URL.replace_all(&s, "");
        let s = RE_HANDLE.replace_all(&s, "");
        let s = RE_MARKUP.replace_all(&s, "");
        let s = RE_SPACES.replace_all(&s, " ");
        let next = s.trim().to_string();
        if next == current {
            break;
        }
        current = next;
    }

    if !current.chars().any(char::is_alphanumeric) || RE_BOILERPLATE.is_match(&current) {
        return String::new();
    }
    current
}

/// Normalize a raw message.  Idempotent: `normalize_text(normalize_text(x))
/// == normalize_text(x)`.  Empty output means nothing usable survived.
pub fn normalize_text(raw: &str) -> String {
    raw.lines()
        .map(clean_line)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::normalize_text;

    #[test]
    fn strips_markup_links_and_handles() {
        assert_eq!(normalize_text("**Test**\n\nhttps://example.com\n@user\n"), "Test");
    }

    #[test]
    fn keeps_line_structure() {
        let raw = "Харківщина:\n\n▪️2 на Богодухів\n➡️ Підписатися";
        assert_eq!(normalize_text(raw), "Харківщина:\n▪2 на Богодухів");
    }

    #[test]
    fn emoji_modifiers_are_dropped() {
        assert_eq!(normalize_text("▪\u{FE0F}2 на Богодухів"), "▪2 на Богодухів");
        assert_eq!(normalize_text("➡\u{FE0F} Ромни 👍\u{1F3FD}"), "➡ Ромни 👍");
        assert_eq!(normalize_text("3\u{FE0F}\u{20E3} на Суми"), "3 на Суми");
    }

    #[test]
    fn emoji_and_separator_lines_vanish() {
        assert_eq!(normalize_text("🔴🔴🔴\n———\n⬆️⬇️"), "");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn collapses_whitespace_and_fillers() {
        assert_eq!(normalize_text("  Київ\u{200B}  -   вибухи \u{3164}"), "Київ - вибухи");
    }

    #[test]
    fn drops_boilerplate_lines() {
        let raw = "2 шахеди на Суми\nМоніторинг 24/7\nНе фіксується\nчисто";
        assert_eq!(normalize_text(raw), "2 шахеди на Суми");
    }

    #[test]
    fn is_idempotent() {
        let inputs = [
            "**Test**\n\nhttps://example.com\n@user\n",
            "*_*_*Київ*_*_*",
            "  ▪️ 3 на  Полтаву  \n\n🔴",
            "`БПЛА` __Харків__ (Харківська обл.)",
            "t.me/channel Суми",
        ];
        for raw in inputs {
            let once = normalize_text(raw);
            assert_eq!(normalize_text(&once), once, "input {raw:?}");
        }
    }
}

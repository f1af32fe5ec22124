use std::fmt;

pub const NS_MAIN: i32 = 0;
pub const NS_FILE: i32 = 6;
pub const NS_CATEGORY: i32 = 14;

const NAMESPACES: &[(&str, i32)] = &[
    ("Talk", 1),
    ("User", 2),
    ("User talk", 3),
    ("Project", 4),
    ("Project talk", 5),
    ("File", NS_FILE),
    ("File talk", 7),
    ("MediaWiki", 8),
    ("MediaWiki talk", 9),
    ("Template", 10),
    ("Template talk", 11),
    ("Help", 12),
    ("Help talk", 13),
    ("Category", NS_CATEGORY),
    ("Category talk", 15),
    ("Module", 828),
    ("Module talk", 829),
];

const NAMESPACE_ALIASES: &[(&str, &str)] = &[("Image", "File"), ("Image talk", "File talk")];

/// A normalized page title with an optional section fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTitle {
    title: String,
    section: Option<String>,
}

impl PageTitle {
    /// Parse `Title#Section`. The title part is normalized the way MediaWiki
    /// stores it; the section is kept as written.
    pub fn parse(value: &str) -> Self {
        let (title_part, section) = match value.split_once('#') {
            Some((title_part, section)) => {
                let section = section.trim();
                let section = (!section.is_empty()).then(|| section.to_string());
                (title_part, section)
            }
            None => (value, None),
        };
        Self {
            title: normalize_title(title_part),
            section,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    pub fn without_section(&self) -> &str {
        &self.title
    }

    pub fn namespace(&self) -> i32 {
        namespace_id(&self.title)
    }

    /// Wikilink form used in notices, e.g. `[[Paris#History]]`.
    pub fn as_link(&self) -> String {
        format!("[[{self}]]")
    }
}

impl fmt::Display for PageTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.section {
            Some(section) => write!(f, "{}#{}", self.title, section),
            None => f.write_str(&self.title),
        }
    }
}

/// Canonical form of a title: underscores become spaces, runs of whitespace
/// collapse, leading colons are dropped, known namespace prefixes take their
/// canonical spelling and the first letter of the page name is uppercased.
pub fn normalize_title(value: &str) -> String {
    let spaced = normalize_spaces(&value.replace('_', " "));
    let mut trimmed = spaced.as_str();
    while let Some(stripped) = trimmed.strip_prefix(':') {
        trimmed = stripped.trim_start();
    }
    if trimmed.is_empty() {
        return String::new();
    }

    if let Some((prefix, rest)) = trimmed.split_once(':')
        && let Some(namespace) = canonical_namespace(prefix)
    {
        let body = rest.trim();
        if body.is_empty() {
            return String::new();
        }
        return format!("{namespace}:{}", capitalize_first(body));
    }

    capitalize_first(trimmed)
}

/// Dedupe key for titles that may carry a section fragment.
pub fn title_key(value: &str) -> String {
    let without_section = value.split('#').next().unwrap_or("");
    normalize_title(without_section)
}

pub fn namespace_id(title: &str) -> i32 {
    title
        .split_once(':')
        .and_then(|(prefix, _)| canonical_namespace(prefix))
        .and_then(|canonical| {
            NAMESPACES
                .iter()
                .find(|(name, _)| *name == canonical)
                .map(|(_, id)| *id)
        })
        .unwrap_or(NS_MAIN)
}

pub fn namespace_name(id: i32) -> Option<&'static str> {
    NAMESPACES
        .iter()
        .find(|(_, value)| *value == id)
        .map(|(name, _)| *name)
}

fn canonical_namespace(prefix: &str) -> Option<&'static str> {
    let trimmed = normalize_spaces(prefix);
    if let Some((_, canonical)) = NAMESPACE_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(&trimmed))
    {
        return Some(*canonical);
    }
    NAMESPACES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&trimmed))
        .map(|(name, _)| *name)
}

fn capitalize_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub(crate) fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}

use anyhow::{Result, bail};

use crate::api::Page;

pub const BOLD_LABEL: &str = "make bold";
pub const BOLD_HOTKEY: char = 'b';

/// What picking a choice does to the current link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceAction {
    Skip,
    Unlink,
    UnlinkPage,
    UnlinkAll,
    Edit,
    MoreContext,
    Quit,
    /// Replace the link with the bold page title it was created for.
    Bold { title: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    label: String,
    hotkey: char,
    action: ChoiceAction,
}

impl Choice {
    pub fn new(label: impl Into<String>, hotkey: char, action: ChoiceAction) -> Self {
        Self {
            label: label.into(),
            hotkey: hotkey.to_ascii_lowercase(),
            action,
        }
    }

    /// The "make bold" choice for one page. Built per page because the
    /// replacement text is that page's own title.
    pub fn bold(page: &Page) -> Self {
        Self::new(
            BOLD_LABEL,
            BOLD_HOTKEY,
            ChoiceAction::Bold {
                title: page.title.without_section().to_string(),
            },
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn hotkey(&self) -> char {
        self.hotkey
    }

    pub fn action(&self) -> &ChoiceAction {
        &self.action
    }

    /// Replacement text for choices that substitute the link.
    pub fn replacement(&self) -> Option<String> {
        match &self.action {
            ChoiceAction::Bold { title } => Some(format!("'''{title}'''")),
            _ => None,
        }
    }

    pub fn matches(&self, answer: char) -> bool {
        self.hotkey.eq_ignore_ascii_case(&answer)
    }

    pub fn display(&self, is_default: bool) -> String {
        format_option(&self.label, self.hotkey, is_default)
    }
}

/// Render `label` with its hotkey bracketed, e.g. `[u]nlink` or `quit [x]`.
/// The default option shows its hotkey uppercased.
pub fn format_option(label: &str, hotkey: char, is_default: bool) -> String {
    let shown = if is_default {
        hotkey.to_ascii_uppercase()
    } else {
        hotkey.to_ascii_lowercase()
    };
    match label
        .char_indices()
        .find(|(_, ch)| ch.eq_ignore_ascii_case(&hotkey))
    {
        Some((index, ch)) => {
            let after = index + ch.len_utf8();
            format!("{}[{}]{}", &label[..index], shown, &label[after..])
        }
        None => format!("{label} [{shown}]"),
    }
}

/// Ordered choices offered for one link, with a default used when prompting
/// is disabled.
#[derive(Debug, Clone)]
pub struct ChoiceSet {
    choices: Vec<Choice>,
    default_index: usize,
}

impl ChoiceSet {
    /// The stock unlink decisions. Unlinking is the default.
    pub fn unlink_base() -> Self {
        Self {
            choices: vec![
                Choice::new("Do not change", 'n', ChoiceAction::Skip),
                Choice::new("Unlink", 'u', ChoiceAction::Unlink),
                Choice::new("unlink all on page", 'p', ChoiceAction::UnlinkPage),
                Choice::new("unlink all pages", 'a', ChoiceAction::UnlinkAll),
                Choice::new("edit", 'e', ChoiceAction::Edit),
                Choice::new("more context", 'm', ChoiceAction::MoreContext),
                Choice::new("quit", 'q', ChoiceAction::Quit),
            ],
            default_index: 1,
        }
    }

    /// Append a choice after the existing ones. Hotkeys must stay unique.
    pub fn push(&mut self, choice: Choice) -> Result<()> {
        if let Some(existing) = self.find(choice.hotkey) {
            bail!(
                "hotkey '{}' of choice '{}' is already used by '{}'",
                choice.hotkey,
                choice.label,
                existing.label
            );
        }
        self.choices.push(choice);
        Ok(())
    }

    pub fn find(&self, answer: char) -> Option<&Choice> {
        self.choices.iter().find(|choice| choice.matches(answer))
    }

    pub fn default_choice(&self) -> &Choice {
        &self.choices[self.default_index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Choice> {
        self.choices.iter()
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// `(label, hotkey)` pairs in prompt order.
    pub fn options(&self) -> Vec<(&str, char)> {
        self.choices
            .iter()
            .map(|choice| (choice.label(), choice.hotkey()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn bold_replacement_strips_section() {
        let page = Page::new("Example Page#Section", "text");
        let choice = Choice::bold(&page);
        assert_eq!(choice.label(), "make bold");
        assert_eq!(choice.hotkey(), 'b');
        assert_eq!(choice.replacement().as_deref(), Some("'''Example Page'''"));
    }

    #[test]
    fn bold_replacement_wraps_plain_title_unchanged() {
        let page = Page::new("Paris", "text");
        assert_eq!(
            Choice::bold(&page).replacement().as_deref(),
            Some("'''Paris'''")
        );
    }

    #[test]
    fn non_replacing_choices_have_no_replacement() {
        let set = ChoiceSet::unlink_base();
        assert!(set.iter().all(|choice| choice.replacement().is_none()));
    }

    #[test]
    fn bold_hotkey_is_unique_in_merged_set() {
        let page = Page::new("Paris", "");
        let mut set = ChoiceSet::unlink_base();
        let base_len = set.len();
        set.push(Choice::bold(&page)).expect("append bold choice");

        assert_eq!(set.len(), base_len + 1);
        let hotkeys = set.iter().map(Choice::hotkey).collect::<BTreeSet<_>>();
        assert_eq!(hotkeys.len(), set.len());
        assert_eq!(set.iter().last().map(Choice::hotkey), Some('b'));
        assert_eq!(set.default_choice().action(), &ChoiceAction::Unlink);
    }

    #[test]
    fn push_rejects_colliding_hotkey() {
        let mut set = ChoiceSet::unlink_base();
        let error = set
            .push(Choice::new("Uppercase", 'U', ChoiceAction::Skip))
            .expect_err("collision must fail");
        assert!(error.to_string().contains("already used by 'Unlink'"));
    }

    #[test]
    fn find_is_case_insensitive() {
        let set = ChoiceSet::unlink_base();
        assert_eq!(set.find('Q').map(Choice::action), Some(&ChoiceAction::Quit));
        assert!(set.find('z').is_none());
    }

    #[test]
    fn format_option_brackets_hotkey() {
        assert_eq!(format_option("Do not change", 'n', false), "Do [n]ot change");
        assert_eq!(format_option("Unlink", 'u', true), "[U]nlink");
        assert_eq!(format_option("make bold", 'b', false), "make [b]old");
        assert_eq!(format_option("quit", 'x', false), "quit [x]");
    }
}

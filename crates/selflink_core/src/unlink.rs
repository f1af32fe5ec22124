use anyhow::{Result, anyhow};
use log::debug;

use crate::api::Page;
use crate::choice::{Choice, ChoiceAction, ChoiceSet};
use crate::interaction::Interaction;
use crate::title::PageTitle;
use crate::wikilink::{WikiLink, extract_wikilinks};

pub const DEFAULT_CONTEXT: usize = 100;
pub const CONTEXT_STEP: usize = 100;

/// Links on a page that point back to the page itself, in text order.
pub fn find_self_links(text: &str, title: &PageTitle) -> Vec<WikiLink> {
    extract_wikilinks(text)
        .into_iter()
        .filter(|link| !link.title.is_empty() && link.title == title.without_section())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlinkOutcome {
    pub text: String,
    pub unlinked: usize,
    pub bolded: usize,
    pub skipped: usize,
    pub edited: bool,
    pub quit: bool,
}

#[derive(Debug, Clone)]
pub struct Unlinker {
    context: usize,
}

impl Default for Unlinker {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT)
    }
}

impl Unlinker {
    pub fn new(context: usize) -> Self {
        Self { context }
    }

    /// Walk the self-links of `page` and apply one choice to each.
    ///
    /// `always` is the run-wide flag: while set, every link gets the default
    /// choice without a prompt, and picking "unlink all pages" sets it.
    pub fn unlink<U: Interaction + ?Sized>(
        &self,
        page: &Page,
        choices: &ChoiceSet,
        always: &mut bool,
        ui: &mut U,
    ) -> Result<UnlinkOutcome> {
        let text = page.text.as_str();
        let links = find_self_links(text, &page.title);
        debug!("{} self-link(s) on {}", links.len(), page.title);

        let mut outcome = UnlinkOutcome::default();
        let mut output = String::with_capacity(text.len());
        let mut cursor = 0usize;
        let mut unlink_page = false;

        for link in &links {
            output.push_str(&text[cursor..link.start]);
            let markup = link.markup(text);
            let mut context = self.context;

            let choice = loop {
                if *always || unlink_page {
                    break choices.default_choice();
                }
                let current = format!("{output}{}", &text[link.start..]);
                let link_start = output.len();
                ui.output(&render_context(
                    &current,
                    link_start,
                    link_start + markup.len(),
                    context,
                ));
                let answer = ui.input_choice(
                    &format!("Should the link {markup} be changed?"),
                    &choices.options(),
                    choices.default_choice().hotkey(),
                )?;
                let choice = choices
                    .find(answer)
                    .ok_or_else(|| anyhow!("no choice with hotkey '{answer}'"))?;
                if *choice.action() == ChoiceAction::MoreContext {
                    context += CONTEXT_STEP;
                    continue;
                }
                break choice;
            };

            match choice.action() {
                ChoiceAction::Skip | ChoiceAction::MoreContext => {
                    output.push_str(markup);
                    outcome.skipped += 1;
                }
                ChoiceAction::Unlink => push_unlinked(&mut output, link, &mut outcome),
                ChoiceAction::UnlinkPage => {
                    unlink_page = true;
                    push_unlinked(&mut output, link, &mut outcome);
                }
                ChoiceAction::UnlinkAll => {
                    *always = true;
                    push_unlinked(&mut output, link, &mut outcome);
                }
                ChoiceAction::Bold { .. } => {
                    push_replacement(&mut output, choice, link, markup);
                    outcome.bolded += 1;
                }
                ChoiceAction::Edit => {
                    let current = format!("{output}{}", &text[link.start..]);
                    match ui.edit_text(&current)? {
                        Some(edited) => {
                            outcome.text = edited;
                            outcome.edited = true;
                        }
                        None => outcome.text = current,
                    }
                    return Ok(outcome);
                }
                ChoiceAction::Quit => {
                    outcome.text = text.to_string();
                    outcome.quit = true;
                    return Ok(outcome);
                }
            }
            cursor = link.end;
        }

        output.push_str(&text[cursor..]);
        outcome.text = output;
        Ok(outcome)
    }
}

fn push_unlinked(output: &mut String, link: &WikiLink, outcome: &mut UnlinkOutcome) {
    output.push_str(link.display_text());
    output.push_str(&link.trail);
    outcome.unlinked += 1;
}

fn push_replacement(output: &mut String, choice: &Choice, link: &WikiLink, markup: &str) {
    match choice.replacement() {
        Some(replacement) => {
            output.push_str(&replacement);
            output.push_str(&link.trail);
        }
        None => output.push_str(markup),
    }
}

/// Up to `width` characters on each side of `start..end`, link included.
fn render_context(text: &str, start: usize, end: usize, width: usize) -> String {
    let before = &text[..start];
    let before = match width
        .checked_sub(1)
        .and_then(|skip| before.char_indices().rev().nth(skip))
    {
        Some((index, _)) => &before[index..],
        None if width == 0 => "",
        None => before,
    };
    let after = &text[end..];
    let after = match after.char_indices().nth(width) {
        Some((index, _)) => &after[..index],
        None => after,
    };
    format!("{before}{}{after}", &text[start..end])
}

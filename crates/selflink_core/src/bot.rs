use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use similar::TextDiff;

use crate::api::{Page, WikiSite};
use crate::choice::{Choice, ChoiceSet};
use crate::guard::{should_process, skip_notice};
use crate::interaction::Interaction;
use crate::pagegen::{GeneratorOptions, PARAMETER_HELP, combined_titles, require_generator};
use crate::title::title_key;
use crate::unlink::{DEFAULT_CONTEXT, UnlinkOutcome, Unlinker};

pub const DEFAULT_SUMMARY: &str = "Bot: Removing selflinks";
pub const PRELOAD_BATCH_SIZE: usize = 50;

const SAVE_QUESTION: &str = "Do you want to accept these changes?";
const SAVE_OPTIONS: &[(&str, char)] = &[("yes", 'y'), ("no", 'n'), ("all", 'a'), ("quit", 'q')];

pub const USAGE_TEMPLATE: &str = "\
This bot searches for selflinks and allows removing them.

These command line parameters can be used to specify which pages to work on:

&params;

--always              Unlink always but don't prompt you for each
                      replacement. ATTENTION: Use this with care!";

/// Usage text with the page selection help filled in.
pub fn usage_text() -> String {
    USAGE_TEMPLATE.replace("&params;", PARAMETER_HELP)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotOptions {
    pub always: bool,
    pub simulate: bool,
    pub summary: String,
    pub context: usize,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            always: false,
            simulate: false,
            summary: DEFAULT_SUMMARY.to_string(),
            context: DEFAULT_CONTEXT,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageResult {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
}

impl PageResult {
    fn new(page: &Page, action: &str, detail: Option<String>) -> Self {
        Self {
            title: page.title.to_string(),
            action: action.to_string(),
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BotReport {
    pub success: bool,
    pub site: String,
    pub simulate: bool,
    pub requested_pages: usize,
    pub processed: usize,
    pub saved: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub pages: Vec<PageResult>,
    pub quit: bool,
    pub request_count: usize,
}

/// Removes links from pages to themselves.
pub struct SelflinkBot<'a, S: WikiSite + ?Sized, U: Interaction + ?Sized> {
    site: &'a mut S,
    ui: &'a mut U,
    unlinker: Unlinker,
    options: BotOptions,
    always: bool,
    quit: bool,
}

impl<'a, S: WikiSite + ?Sized, U: Interaction + ?Sized> SelflinkBot<'a, S, U> {
    pub fn new(site: &'a mut S, ui: &'a mut U, options: BotOptions) -> Self {
        Self {
            site,
            ui,
            unlinker: Unlinker::new(options.context),
            always: options.always,
            options,
            quit: false,
        }
    }

    /// Whether links are currently unlinked and saved without asking.
    pub fn always(&self) -> bool {
        self.always
    }

    pub fn run(&mut self, titles: &[String]) -> Result<BotReport> {
        let mut report = BotReport {
            success: true,
            site: self.site.site_name(),
            simulate: self.options.simulate,
            requested_pages: titles.len(),
            ..BotReport::default()
        };

        'batches: for batch in titles.chunks(PRELOAD_BATCH_SIZE) {
            let mut loaded: BTreeMap<String, Page> = self
                .site
                .load_pages(batch)
                .with_context(|| format!("failed to load {} page(s)", batch.len()))?
                .into_iter()
                .map(|page| (title_key(page.title.title()), page))
                .collect();

            for title in batch {
                let page = match loaded.remove(&title_key(title)) {
                    Some(page) if page.exists => page,
                    _ => {
                        let page = Page::missing(title);
                        self.ui.output(&format!(
                            "Page {} does not exist; skipping.",
                            page.title.as_link()
                        ));
                        report.skipped += 1;
                        report
                            .pages
                            .push(PageResult::new(&page, "missing", None));
                        continue;
                    }
                };

                let result = self.treat_page(&page)?;
                match result.action.as_str() {
                    "skipped" | "declined" => report.skipped += 1,
                    "unchanged" => report.unchanged += 1,
                    "saved" | "would_save" => report.saved += 1,
                    "error" => {
                        report.success = false;
                        report.errors.push(format!(
                            "{}: {}",
                            result.title,
                            result.detail.as_deref().unwrap_or("save failed")
                        ));
                    }
                    _ => {}
                }
                if result.action != "quit" {
                    report.processed += 1;
                }
                report.pages.push(result);

                if self.quit {
                    report.quit = true;
                    break 'batches;
                }
            }
        }

        report.request_count = self.site.request_count();
        info!(
            "processed {} page(s), saved {}, {} error(s)",
            report.processed,
            report.saved,
            report.errors.len()
        );
        Ok(report)
    }

    /// Unlink every link on `page` that points to `page`.
    pub fn treat_page(&mut self, page: &Page) -> Result<PageResult> {
        self.ui.output(&format!("\n>>> {} <<<", page.title));

        // Selflinks inside image maps create tooltip labels.
        if !should_process(&page.text) {
            self.ui.output(&skip_notice(&page.title));
            return Ok(PageResult::new(
                page,
                "skipped",
                Some("contains an image map".to_string()),
            ));
        }

        let choices = self.create_choices(page)?;
        let outcome = self
            .unlinker
            .unlink(page, &choices, &mut self.always, &mut *self.ui)?;
        if outcome.quit {
            self.quit = true;
            return Ok(PageResult::new(page, "quit", None));
        }
        self.put_current(page, &outcome)
    }

    /// Base unlink choices plus "make bold" for this page.
    fn create_choices(&self, page: &Page) -> Result<ChoiceSet> {
        let mut choices = ChoiceSet::unlink_base();
        choices.push(Choice::bold(page))?;
        Ok(choices)
    }

    fn put_current(&mut self, page: &Page, outcome: &UnlinkOutcome) -> Result<PageResult> {
        if outcome.text == page.text {
            self.ui.output(&format!(
                "No changes were necessary in {}",
                page.title.as_link()
            ));
            return Ok(PageResult::new(page, "unchanged", None));
        }

        self.ui
            .output(&render_diff(page.title.title(), &page.text, &outcome.text));

        if !self.always {
            match self.ui.input_choice(SAVE_QUESTION, SAVE_OPTIONS, 'n')? {
                'y' => {}
                'a' => self.always = true,
                'q' => {
                    self.quit = true;
                    return Ok(PageResult::new(page, "quit", None));
                }
                _ => {
                    return Ok(PageResult::new(
                        page,
                        "declined",
                        Some("changes not accepted".to_string()),
                    ));
                }
            }
        }

        let detail = describe_outcome(outcome);
        if self.options.simulate {
            info!("simulation: not saving {}", page.title);
            return Ok(PageResult::new(page, "would_save", Some(detail)));
        }

        match self
            .site
            .save_page(page, &outcome.text, &self.options.summary)
        {
            Ok(()) => Ok(PageResult::new(page, "saved", Some(detail))),
            Err(error) => {
                warn!("failed to save {}: {error:#}", page.title);
                self.ui.output(&format!(
                    "Error saving {}: {error:#}",
                    page.title.as_link()
                ));
                Ok(PageResult::new(page, "error", Some(format!("{error:#}"))))
            }
        }
    }
}

/// Select pages from `options` and run the bot over them. Fails before
/// touching `site` when no generator was given.
pub fn run_selflink<S: WikiSite + ?Sized, U: Interaction + ?Sized>(
    site: &mut S,
    ui: &mut U,
    generator: &GeneratorOptions,
    options: BotOptions,
) -> Result<BotReport> {
    require_generator(generator)?;
    let titles = combined_titles(generator, site)?;
    SelflinkBot::new(site, ui, options).run(&titles)
}

fn render_diff(title: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(title, title)
        .to_string()
}

fn describe_outcome(outcome: &UnlinkOutcome) -> String {
    if outcome.edited {
        return "edited manually".to_string();
    }
    format!(
        "unlinked {}, bolded {}, kept {}",
        outcome.unlinked, outcome.bolded, outcome.skipped
    )
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;
    use crate::api::PageSource;
    use crate::interaction::testing::ScriptedInteraction;
    use crate::pagegen::MISSING_GENERATOR_MESSAGE;
    use crate::title::normalize_title;

    #[derive(Default)]
    struct MockSite {
        pages: BTreeMap<String, String>,
        saved: Vec<(String, String, String)>,
        fail_saves: bool,
        fail_loads: bool,
        load_batches: Vec<usize>,
        requests: usize,
    }

    impl MockSite {
        fn with_pages(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(title, text)| (title.to_string(), text.to_string()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl PageSource for MockSite {
        fn get_all_pages(&mut self, _namespace: i32) -> Result<Vec<String>> {
            self.requests += 1;
            Ok(self.pages.keys().cloned().collect())
        }

        fn get_category_members(&mut self, _category: &str) -> Result<Vec<String>> {
            self.requests += 1;
            Ok(Vec::new())
        }

        fn get_recent_changes(&mut self, _since: &str, _namespaces: &[i32]) -> Result<Vec<String>> {
            self.requests += 1;
            Ok(Vec::new())
        }

        fn search(&mut self, _query: &str, _namespaces: &[i32], _limit: usize) -> Result<Vec<String>> {
            self.requests += 1;
            Ok(Vec::new())
        }

        fn request_count(&self) -> usize {
            self.requests
        }
    }

    impl WikiSite for MockSite {
        fn site_name(&self) -> String {
            "mock".to_string()
        }

        fn load_pages(&mut self, titles: &[String]) -> Result<Vec<Page>> {
            self.requests += 1;
            if self.fail_loads {
                bail!("HTTP 503 Service Unavailable");
            }
            self.load_batches.push(titles.len());
            Ok(titles
                .iter()
                .rev()
                .map(|title| match self.pages.get(&normalize_title(title)) {
                    Some(text) => Page::new(title, text.clone()),
                    None => Page::missing(title),
                })
                .collect())
        }

        fn save_page(&mut self, page: &Page, text: &str, summary: &str) -> Result<()> {
            self.requests += 1;
            if self.fail_saves {
                bail!("editconflict: Edit conflict");
            }
            self.saved.push((
                page.title.title().to_string(),
                text.to_string(),
                summary.to_string(),
            ));
            Ok(())
        }
    }

    fn titles(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn bold_choice_is_saved_after_confirmation() {
        let mut site = MockSite::with_pages(&[("Paris", "See also [[Paris]] for details.")]);
        let mut ui = ScriptedInteraction::with_answers("by");
        let report = SelflinkBot::new(&mut site, &mut ui, BotOptions::default())
            .run(&titles(&["Paris"]))
            .expect("run");

        assert!(report.success);
        assert_eq!(report.saved, 1);
        assert_eq!(
            site.saved,
            vec![(
                "Paris".to_string(),
                "See also '''Paris''' for details.".to_string(),
                DEFAULT_SUMMARY.to_string()
            )]
        );
        assert_eq!(ui.questions.last().map(String::as_str), Some(SAVE_QUESTION));
        assert!(ui.outputs.iter().any(|line| line.contains("+See also '''Paris''' for details.")));
    }

    #[test]
    fn image_map_pages_are_skipped_with_notice() {
        let text = "<imagemap>\nFile:Map.png\nrect 0 0 10 10 [[Paris]]\n</imagemap>";
        let mut site = MockSite::with_pages(&[("Paris", text)]);
        let mut ui = ScriptedInteraction::default();
        let report = SelflinkBot::new(&mut site, &mut ui, BotOptions::default())
            .run(&titles(&["Paris"]))
            .expect("run");

        assert_eq!(report.skipped, 1);
        assert!(site.saved.is_empty());
        assert!(ui.questions.is_empty());
        assert!(
            ui.outputs
                .contains(&"Skipping page [[Paris]] because it contains an image map.".to_string())
        );
        assert_eq!(
            report.pages[0].detail.as_deref(),
            Some("contains an image map")
        );
    }

    #[test]
    fn missing_generator_fails_before_contacting_site() {
        let mut site = MockSite::with_pages(&[("Paris", "[[Paris]]")]);
        let mut ui = ScriptedInteraction::default();
        let error = run_selflink(
            &mut site,
            &mut ui,
            &GeneratorOptions::default(),
            BotOptions::default(),
        )
        .expect_err("missing generator");

        assert!(error.to_string().contains(MISSING_GENERATOR_MESSAGE));
        assert_eq!(site.request_count(), 0);
        assert!(ui.outputs.is_empty());
    }

    #[test]
    fn always_mode_saves_without_prompting() {
        let mut site = MockSite::with_pages(&[
            ("Paris", "[[Paris]] is [[Paris|the capital]]."),
            ("Lyon", "[[Lyon]]nais"),
        ]);
        let mut ui = ScriptedInteraction::default();
        let options = BotOptions {
            always: true,
            ..BotOptions::default()
        };
        let report = run_selflink(
            &mut site,
            &mut ui,
            &GeneratorOptions {
                allpages: true,
                ..GeneratorOptions::default()
            },
            options,
        )
        .expect("run");

        assert_eq!(report.saved, 2);
        assert!(ui.questions.is_empty());
        let saved = site
            .saved
            .iter()
            .map(|(title, text, _)| (title.as_str(), text.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(saved, vec![("Lyon", "Lyonnais"), ("Paris", "Paris is the capital.")]);
    }

    #[test]
    fn unlink_all_pages_carries_over_to_next_page() {
        let mut site = MockSite::with_pages(&[("Alpha", "[[Alpha]]"), ("Beta", "[[Beta]]")]);
        let mut ui = ScriptedInteraction::with_answers("a");
        let mut bot = SelflinkBot::new(&mut site, &mut ui, BotOptions::default());
        let report = bot.run(&titles(&["Alpha", "Beta"])).expect("run");
        assert!(bot.always());
        assert_eq!(report.saved, 2);
        assert_eq!(ui.questions.len(), 1);
    }

    #[test]
    fn simulate_never_writes() {
        let mut site = MockSite::with_pages(&[("Paris", "[[Paris]]")]);
        let mut ui = ScriptedInteraction::with_answers("uy");
        let options = BotOptions {
            simulate: true,
            ..BotOptions::default()
        };
        let report = SelflinkBot::new(&mut site, &mut ui, options)
            .run(&titles(&["Paris"]))
            .expect("run");
        assert!(site.saved.is_empty());
        assert!(report.simulate);
        assert_eq!(report.pages[0].action, "would_save");
    }

    #[test]
    fn unchanged_and_declined_pages_are_not_saved() {
        let mut site = MockSite::with_pages(&[
            ("Alpha", "[[Alpha]]"),
            ("Beta", "no links"),
            ("Gamma", "[[Gamma]]"),
        ]);
        let mut ui = ScriptedInteraction::with_answers("nun");
        let report = SelflinkBot::new(&mut site, &mut ui, BotOptions::default())
            .run(&titles(&["Alpha", "Beta", "Gamma"]))
            .expect("run");

        assert!(site.saved.is_empty());
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.pages[2].action, "declined");
        assert!(
            ui.outputs
                .contains(&"No changes were necessary in [[Beta]]".to_string())
        );
    }

    #[test]
    fn quit_stops_the_run() {
        let mut site = MockSite::with_pages(&[("Alpha", "[[Alpha]]"), ("Beta", "[[Beta]]")]);
        let mut ui = ScriptedInteraction::with_answers("q");
        let report = SelflinkBot::new(&mut site, &mut ui, BotOptions::default())
            .run(&titles(&["Alpha", "Beta"]))
            .expect("run");
        assert!(report.quit);
        assert_eq!(report.pages.len(), 1);
        assert!(site.saved.is_empty());
    }

    #[test]
    fn save_prompt_all_skips_later_prompts() {
        let mut site = MockSite::with_pages(&[("Alpha", "[[Alpha]]"), ("Beta", "[[Beta]]")]);
        let mut ui = ScriptedInteraction::with_answers("ua");
        let mut bot = SelflinkBot::new(&mut site, &mut ui, BotOptions::default());
        let report = bot.run(&titles(&["Alpha", "Beta"])).expect("run");

        assert!(bot.always());
        assert_eq!(report.saved, 2);
        assert_eq!(
            ui.questions,
            vec!["Should the link [[Alpha]] be changed?", SAVE_QUESTION]
        );
        let saved = site
            .saved
            .iter()
            .map(|(title, text, _)| (title.as_str(), text.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(saved, vec![("Alpha", "Alpha"), ("Beta", "Beta")]);
    }

    #[test]
    fn save_prompt_quit_stops_run() {
        let mut site = MockSite::with_pages(&[("Alpha", "[[Alpha]]"), ("Beta", "[[Beta]]")]);
        let mut ui = ScriptedInteraction::with_answers("uq");
        let report = SelflinkBot::new(&mut site, &mut ui, BotOptions::default())
            .run(&titles(&["Alpha", "Beta"]))
            .expect("run");

        assert!(report.quit);
        assert!(site.saved.is_empty());
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].action, "quit");
        assert_eq!(ui.questions.len(), 2);
    }

    #[test]
    fn load_failure_aborts_run() {
        let mut site = MockSite::with_pages(&[("Alpha", "[[Alpha]]")]);
        site.fail_loads = true;
        let mut ui = ScriptedInteraction::default();
        let error = SelflinkBot::new(&mut site, &mut ui, BotOptions::default())
            .run(&titles(&["Alpha"]))
            .expect_err("load failure");

        assert!(error.to_string().contains("failed to load 1 page(s)"));
        assert!(format!("{error:#}").contains("HTTP 503"));
        assert!(site.saved.is_empty());
        assert!(ui.questions.is_empty());
    }

    #[test]
    fn save_errors_are_recorded_and_run_continues() {
        let mut site = MockSite::with_pages(&[("Alpha", "[[Alpha]]"), ("Beta", "[[Beta]]")]);
        site.fail_saves = true;
        let mut ui = ScriptedInteraction::default();
        let options = BotOptions {
            always: true,
            ..BotOptions::default()
        };
        let report = SelflinkBot::new(&mut site, &mut ui, options)
            .run(&titles(&["Alpha", "Beta"]))
            .expect("run");
        assert!(!report.success);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.processed, 2);
        assert!(report.errors[0].contains("Edit conflict"));
    }

    #[test]
    fn missing_pages_are_reported_and_batches_are_bounded() {
        let mut names = (0..60).map(|index| format!("Page {index}")).collect::<Vec<_>>();
        names.push("Absent".to_string());
        let pages = names[..60]
            .iter()
            .map(|name| (name.as_str(), "plain text"))
            .collect::<Vec<_>>();
        let mut site = MockSite::with_pages(&pages);
        let mut ui = ScriptedInteraction::default();
        let report = SelflinkBot::new(&mut site, &mut ui, BotOptions::default())
            .run(&names)
            .expect("run");

        assert_eq!(site.load_batches, vec![50, 11]);
        assert_eq!(report.unchanged, 60);
        assert_eq!(report.pages.last().map(|page| page.action.as_str()), Some("missing"));
        assert!(
            ui.outputs
                .contains(&"Page [[Absent]] does not exist; skipping.".to_string())
        );
    }

    #[test]
    fn usage_text_expands_parameter_help() {
        let usage = usage_text();
        assert!(!usage.contains("&params;"));
        assert!(usage.contains("--cat NAME"));
        assert!(usage.contains("--always"));
    }
}

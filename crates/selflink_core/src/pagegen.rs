use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::{debug, info};

use crate::api::PageSource;
use crate::title::{NS_MAIN, namespace_id, title_key};
use crate::wikilink::extract_wikilinks;

pub const MISSING_GENERATOR_MESSAGE: &str =
    "Unable to execute script because no generator was defined.";

const DEFAULT_SEARCH_LIMIT: usize = 500;

/// Help for the page selection flags, substituted for `&params;` in the
/// bot's usage text.
pub const PARAMETER_HELP: &str = "\
--page TITLE          Work on a single page. Can be given several times.

--file PATH           Read the list of pages from a text file. Every
                      [[wikilink]] in the file names a page; a file without
                      links is read as one title per line.

--cat NAME            Work on all pages in a category. The Category:
                      prefix is optional.

--allpages            Work on all pages of the wiki, limited to the
                      namespaces given with --namespace (main namespace
                      by default).

--recentchanges TS    Work on pages changed since the ISO 8601 timestamp TS.

--search QUERY        Work on pages matching a full text search.

--namespace ID        Only work on pages in namespace ID. Can be given
                      several times.

--limit N             Stop after N pages.";

/// Page selection as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratorOptions {
    pub pages: Vec<String>,
    pub file: Option<PathBuf>,
    pub category: Option<String>,
    pub allpages: bool,
    pub recent_changes: Option<String>,
    pub search: Option<String>,
    pub namespaces: Vec<i32>,
    pub limit: Option<usize>,
}

impl GeneratorOptions {
    /// Namespace and limit only filter; they don't select pages.
    pub fn has_generator(&self) -> bool {
        !self.pages.is_empty()
            || self.file.is_some()
            || self.category.is_some()
            || self.allpages
            || self.recent_changes.is_some()
            || self.search.is_some()
    }
}

/// Fails with the usage hint when nothing selects pages. Call before
/// constructing any page source.
pub fn require_generator(options: &GeneratorOptions) -> Result<()> {
    if !options.has_generator() {
        bail!("{MISSING_GENERATOR_MESSAGE}\nUse --help for further information.");
    }
    Ok(())
}

/// Titles selected by every generator in `options`, in generator order,
/// without duplicates.
pub fn combined_titles<S: PageSource + ?Sized>(
    options: &GeneratorOptions,
    source: &mut S,
) -> Result<Vec<String>> {
    require_generator(options)?;
    let mut candidates = options.pages.clone();

    if let Some(path) = &options.file {
        candidates.extend(read_title_file(path)?);
    }
    if let Some(category) = &options.category {
        let members = source
            .get_category_members(category)
            .with_context(|| format!("failed to list category {category}"))?;
        debug!("category {category}: {} member(s)", members.len());
        candidates.extend(members);
    }
    if options.allpages {
        let namespaces = if options.namespaces.is_empty() {
            vec![NS_MAIN]
        } else {
            options.namespaces.clone()
        };
        for namespace in namespaces {
            candidates.extend(
                source
                    .get_all_pages(namespace)
                    .with_context(|| format!("failed to list pages in namespace {namespace}"))?,
            );
        }
    }
    if let Some(since) = &options.recent_changes {
        candidates.extend(
            source
                .get_recent_changes(since, &options.namespaces)
                .with_context(|| format!("failed to list recent changes since {since}"))?,
        );
    }
    if let Some(query) = &options.search {
        let limit = options.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        candidates.extend(
            source
                .search(query, &options.namespaces, limit)
                .with_context(|| format!("failed to search for {query}"))?,
        );
    }

    let mut seen = BTreeSet::new();
    let mut titles = Vec::new();
    for candidate in candidates {
        if options.limit.is_some_and(|limit| titles.len() >= limit) {
            break;
        }
        let trimmed = candidate.trim();
        let key = title_key(trimmed);
        if key.is_empty() || !seen.insert(key.clone()) {
            continue;
        }
        if !options.namespaces.is_empty() && !options.namespaces.contains(&namespace_id(&key)) {
            continue;
        }
        titles.push(trimmed.to_string());
    }

    info!("selected {} page(s)", titles.len());
    Ok(titles)
}

pub fn read_title_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read title file {}", path.display()))?;
    Ok(titles_from_text(&content))
}

/// Link targets in `content`, or its non-empty lines when it has no links.
pub fn titles_from_text(content: &str) -> Vec<String> {
    let linked = extract_wikilinks(content)
        .into_iter()
        .map(|link| link.target)
        .collect::<Vec<_>>();
    if !linked.is_empty() {
        return linked;
    }
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

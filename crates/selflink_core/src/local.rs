use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

use crate::api::{Page, PageSource, WikiSite};
use crate::title::{NS_CATEGORY, namespace_id, normalize_title};
use crate::wikilink::extract_wikilinks;

const PAGE_EXTENSION: &str = "wiki";

/// A directory of `.wiki` files standing in for a wiki.
///
/// `Main/Paris.wiki` is `Paris`, `Category/People.wiki` is `Category:People`
/// and files at the top level belong to the main namespace.
#[derive(Debug, Clone)]
pub struct LocalWiki {
    root: PathBuf,
}

#[derive(Debug, Clone)]
struct LocalPage {
    title: String,
    path: PathBuf,
}

impl LocalWiki {
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            bail!("local wiki directory does not exist: {}", root.display());
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn scan(&self) -> Result<Vec<LocalPage>> {
        let mut pages = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false).sort_by_file_name() {
            let entry = entry.with_context(|| format!("failed to walk {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PAGE_EXTENSION) {
                continue;
            }
            let relative = path
                .strip_prefix(&self.root)
                .with_context(|| format!("{} escapes {}", path.display(), self.root.display()))?;
            let title = relative_path_to_title(&relative.to_string_lossy());
            if title.is_empty() {
                continue;
            }
            pages.push(LocalPage {
                title,
                path: path.to_path_buf(),
            });
        }
        Ok(pages)
    }

    fn index(&self) -> Result<BTreeMap<String, LocalPage>> {
        Ok(self
            .scan()?
            .into_iter()
            .map(|page| (normalize_title(&page.title), page))
            .collect())
    }

    fn read(&self, page: &LocalPage) -> Result<String> {
        fs::read_to_string(&page.path)
            .with_context(|| format!("failed to read {}", page.path.display()))
    }
}

impl PageSource for LocalWiki {
    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|page| namespace_id(&page.title) == namespace)
            .map(|page| page.title)
            .collect())
    }

    fn get_category_members(&mut self, category: &str) -> Result<Vec<String>> {
        let category_title = normalize_title(&if category.contains(':') {
            category.to_string()
        } else {
            format!("Category:{category}")
        });
        if namespace_id(&category_title) != NS_CATEGORY {
            bail!("not a category: {category}");
        }

        let mut members = Vec::new();
        for page in self.scan()? {
            let content = self.read(&page)?;
            let is_member = extract_wikilinks(&content)
                .iter()
                .any(|link| !link.leading_colon && link.title == category_title);
            if is_member {
                members.push(page.title);
            }
        }
        Ok(members)
    }

    fn get_recent_changes(&mut self, _since: &str, _namespaces: &[i32]) -> Result<Vec<String>> {
        bail!(
            "recent changes are not available for local directory {}",
            self.root.display()
        )
    }

    fn search(&mut self, query: &str, namespaces: &[i32], limit: usize) -> Result<Vec<String>> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        for page in self.scan()? {
            if hits.len() >= limit {
                break;
            }
            if !namespaces.is_empty() && !namespaces.contains(&namespace_id(&page.title)) {
                continue;
            }
            if self.read(&page)?.to_lowercase().contains(&needle) {
                hits.push(page.title);
            }
        }
        Ok(hits)
    }

    fn request_count(&self) -> usize {
        0
    }
}

impl WikiSite for LocalWiki {
    fn site_name(&self) -> String {
        self.root.to_string_lossy().replace('\\', "/")
    }

    fn load_pages(&mut self, titles: &[String]) -> Result<Vec<Page>> {
        let index = self.index()?;
        let mut pages = Vec::with_capacity(titles.len());
        for title in titles {
            match index.get(&normalize_title(title)) {
                Some(local) => pages.push(Page::new(&local.title, self.read(local)?)),
                None => pages.push(Page::missing(title)),
            }
        }
        Ok(pages)
    }

    fn save_page(&mut self, page: &Page, text: &str, _summary: &str) -> Result<()> {
        let index = self.index()?;
        let local = index
            .get(page.title.without_section())
            .ok_or_else(|| anyhow::anyhow!("page does not exist locally: {}", page.title))?;
        fs::write(&local.path, text)
            .with_context(|| format!("failed to write {}", local.path.display()))
    }
}

/// Title for a path relative to the directory root.
pub fn relative_path_to_title(relative: &str) -> String {
    let normalized = relative.replace('\\', "/");
    let segments: Vec<&str> = normalized
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    let Some(filename) = segments.last() else {
        return String::new();
    };
    let name = decode_segment(
        filename
            .strip_suffix(&format!(".{PAGE_EXTENSION}"))
            .unwrap_or(filename),
    );

    match segments.first() {
        Some(folder) if segments.len() > 1 && *folder != "Main" => {
            normalize_title(&format!("{folder}:{name}"))
        }
        _ => normalize_title(&name),
    }
}

fn decode_segment(value: &str) -> String {
    value
        .replace("___", "/")
        .replace("--", ":")
        .replace('_', " ")
}

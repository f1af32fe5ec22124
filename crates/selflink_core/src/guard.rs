use crate::title::PageTitle;

pub const IMAGEMAP_MARKER: &str = "<imagemap>";

/// Whether a page may have its selflinks touched at all.
///
/// Links inside an image map are clickable regions whose text becomes the
/// tooltip, so a page with any image map is left alone entirely.
pub fn should_process(text: &str) -> bool {
    !text.contains(IMAGEMAP_MARKER)
}

pub fn skip_notice(title: &PageTitle) -> String {
    format!(
        "Skipping page {} because it contains an image map.",
        title.as_link()
    )
}

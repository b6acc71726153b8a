//! directory listing html rendering.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

// path segment safe characters. everything else in a link target is
// percent-encoded.
const HREF_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A single directory entry, pre-sorted by the caller.
pub(super) struct Entry {
    pub name: String,
    pub is_dir: bool,
}

/// Render the canonical listing document for a directory.
///
/// `title` is `/` for the document root and the directory's own name
/// otherwise. The first entry always links to the parent, `/` when listing
/// the root itself.
pub(super) fn render(title: &str, at_root: bool, entries: &[Entry]) -> String {
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html>\n<head><title>");
    html.push_str(&escape(title));
    html.push_str("</title></head>\n<body>\n<h1>");
    html.push_str(&escape(title));
    html.push_str("</h1>\n<ul>\n");

    html.push_str("<li><a href=\"");
    html.push_str(if at_root { "/" } else { ".." });
    html.push_str("\">..</a></li>\n");

    for entry in entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        html.push_str("<li><a href=\"");
        html.push_str(&utf8_percent_encode(&entry.name, HREF_ENCODE).to_string());
        html.push_str(suffix);
        html.push_str("\">");
        html.push_str(&escape(&entry.name));
        html.push_str(suffix);
        html.push_str("</a></li>\n");
    }

    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

/// Escape a file name for embedding in html text. Code points above 127 are
/// written as numeric character references.
fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c if (c as u32) > 127 => {
                out.push_str("&#");
                out.push_str(itoa::Buffer::new().format(c as u32));
                out.push(';');
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn escaping() {
        assert_eq!(escape("a&b"), "a&amp;b");
        assert_eq!(escape("<\"x\">"), "&lt;&quot;x&quot;&gt;");
        assert_eq!(escape("grüße"), "gr&#252;&#223;e");
        assert_eq!(escape("plain.txt"), "plain.txt");
    }

    #[test]
    fn canonical_listing() {
        let entries = [
            Entry {
                name: String::from("sub"),
                is_dir: true,
            },
            Entry {
                name: String::from("test.html"),
                is_dir: false,
            },
        ];

        let html = render("blub", false, &entries);

        assert_eq!(
            html,
            "<!DOCTYPE html>\n<html>\n<head><title>blub</title></head>\n<body>\n\
             <h1>blub</h1>\n<ul>\n\
             <li><a href=\"..\">..</a></li>\n\
             <li><a href=\"sub/\">sub/</a></li>\n\
             <li><a href=\"test.html\">test.html</a></li>\n\
             </ul>\n</body>\n</html>\n"
        );
    }

    #[test]
    fn root_listing_links_to_root() {
        let html = render("/", true, &[]);
        assert!(html.contains("<title>/</title>"));
        assert!(html.contains("<li><a href=\"/\">..</a></li>"));
    }

    #[test]
    fn names_with_spaces_are_percent_encoded() {
        let entries = [Entry {
            name: String::from("bar baz"),
            is_dir: true,
        }];

        let html = render("foo", false, &entries);
        assert!(html.contains("<li><a href=\"bar%20baz/\">bar baz/</a></li>"));
    }
}

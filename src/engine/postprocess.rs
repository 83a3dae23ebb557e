//! Output post-processing

/// Elements whose content is copied verbatim
const PRESERVED: [&str; 3] = ["pre", "textarea", "script"];

/// Collapse every whitespace run that contains a newline into one newline
///
/// Runs without a newline are kept as they are. Content of `<pre>`,
/// `<textarea>` and `<script>` elements is left untouched; an element that
/// is never closed preserves the rest of the text.
pub fn collapse_whitespace(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;

    while pos < text.len() {
        let Some((start, tag)) = next_preserved(&lower, pos) else {
            collapse_into(&mut out, &text[pos..]);
            break;
        };
        collapse_into(&mut out, &text[pos..start]);

        let close = format!("</{}", tag);
        let end = match lower[start..].find(&close) {
            Some(offset) => {
                let close_at = start + offset;
                lower[close_at..]
                    .find('>')
                    .map_or(text.len(), |gt| close_at + gt + 1)
            }
            None => text.len(),
        };
        out.push_str(&text[start..end]);
        pos = end;
    }
    out
}

/// Byte offset and name of the next preserved opening tag at or after `from`
fn next_preserved(lower: &str, from: usize) -> Option<(usize, &'static str)> {
    let mut search = from;
    while let Some(offset) = lower[search..].find('<') {
        let at = search + offset;
        let rest = &lower[at + 1..];
        for tag in PRESERVED {
            if let Some(after) = rest.strip_prefix(tag) {
                if after.is_empty() || after.starts_with(|c: char| c == '>' || c.is_ascii_whitespace()) {
                    return Some((at, tag));
                }
            }
        }
        search = at + 1;
    }
    None
}

fn collapse_into(out: &mut String, text: &str) {
    let mut run_start: Option<usize> = None;
    for (idx, c) in text.char_indices() {
        if c.is_whitespace() {
            run_start.get_or_insert(idx);
            continue;
        }
        if let Some(start) = run_start.take() {
            push_run(out, &text[start..idx]);
        }
        out.push(c);
    }
    if let Some(start) = run_start {
        push_run(out, &text[start..]);
    }
}

fn push_run(out: &mut String, run: &str) {
    if run.contains('\n') {
        out.push('\n');
    } else {
        out.push_str(run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_newline_runs() {
        assert_eq!(
            collapse_whitespace("<ul>\n    <li>a</li>\n\n    <li>b</li>\n</ul>\n"),
            "<ul>\n<li>a</li>\n<li>b</li>\n</ul>\n"
        );
    }

    #[test]
    fn test_keeps_inline_spaces() {
        assert_eq!(collapse_whitespace("a  b\t c"), "a  b\t c");
    }

    #[test]
    fn test_preserves_pre_and_script() {
        let html = "<div>\n\n  <PRE class=\"x\">line 1\n\n  line 2</PRE>\n\n  <script>\n  let a;\n</script>\n</div>";
        assert_eq!(
            collapse_whitespace(html),
            "<div>\n<PRE class=\"x\">line 1\n\n  line 2</PRE>\n<script>\n  let a;\n</script>\n</div>"
        );
    }

    #[test]
    fn test_similar_tag_names_are_not_preserved() {
        assert_eq!(collapse_whitespace("<prefix>\n\n  x</prefix>"), "<prefix>\nx</prefix>");
    }

    #[test]
    fn test_unclosed_region_is_copied_verbatim() {
        assert_eq!(
            collapse_whitespace("a\n\n<textarea>\n\n  b"),
            "a\n<textarea>\n\n  b"
        );
    }
}

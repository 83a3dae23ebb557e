//! Output buffers with block capture

use crate::error::RuntimeError;

/// Output of one template execution
///
/// The bottom buffer is the template's output. Each open block pushes a
/// named capture buffer on top; text is always written to the top buffer.
#[derive(Debug)]
pub struct Output {
    root: String,
    captures: Vec<(String, String)>,
}

impl Output {
    pub fn new() -> Self {
        Self {
            root: String::new(),
            captures: Vec::new(),
        }
    }

    pub fn write(&mut self, text: &str) {
        match self.captures.last_mut() {
            Some((_, buf)) => buf.push_str(text),
            None => self.root.push_str(text),
        }
    }

    pub fn push_capture(&mut self, name: &str) {
        self.captures.push((name.to_string(), String::new()));
    }

    /// Close the innermost capture, which must belong to `name`
    pub fn pop_capture(&mut self, name: &str) -> Result<String, RuntimeError> {
        match self.captures.pop() {
            Some((open, buf)) if open == name => Ok(buf),
            Some((open, buf)) => {
                let expected = open.clone();
                self.captures.push((open, buf));
                Err(RuntimeError::BlockMismatch {
                    expected,
                    found: name.to_string(),
                })
            }
            None => Err(RuntimeError::BlockMismatch {
                expected: "nothing".to_string(),
                found: name.to_string(),
            }),
        }
    }

    pub fn finish(self) -> Result<String, RuntimeError> {
        match self.captures.into_iter().last() {
            Some((name, _)) => Err(RuntimeError::UnclosedBlock { name }),
            None => Ok(self.root),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_nests() {
        let mut out = Output::new();
        out.write("a");
        out.push_capture("outer");
        out.write("b");
        out.push_capture("inner");
        out.write("c");
        assert_eq!(out.pop_capture("inner").expect("balanced"), "c");
        assert_eq!(out.pop_capture("outer").expect("balanced"), "b");
        out.write("d");
        assert_eq!(out.finish().expect("closed"), "ad");
    }

    #[test]
    fn test_mismatched_end() {
        let mut out = Output::new();
        out.push_capture("header");
        assert_eq!(
            out.pop_capture("footer"),
            Err(RuntimeError::BlockMismatch {
                expected: "header".to_string(),
                found: "footer".to_string(),
            })
        );
        assert_eq!(
            out.finish(),
            Err(RuntimeError::UnclosedBlock {
                name: "header".to_string(),
            })
        );
    }

    #[test]
    fn test_end_without_start() {
        let mut out = Output::new();
        assert!(matches!(
            out.pop_capture("x"),
            Err(RuntimeError::BlockMismatch { .. })
        ));
    }
}

//! Filters and functions available in every engine

use std::cmp::Ordering;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use indexmap::IndexMap;

use crate::engine::extension::{Extension, Filter, Function};
use crate::error::RuntimeError;
use crate::runtime::escape_html;
use crate::value::Value;

/// Upper bound on the number of items `range` will produce
const RANGE_LIMIT: usize = 100_000;

/// The standard library of filters and functions
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreExtension;

impl Extension for CoreExtension {
    fn name(&self) -> &str {
        "core"
    }

    fn filters(&self) -> Vec<(String, Filter)> {
        let filters = [
            ("raw", Filter::safe(|value, _| Ok(value.clone()))),
            ("escape", Filter::safe(escape)),
            ("e", Filter::safe(escape)),
            ("upper", Filter::new(|value, _| Ok(value.to_output().to_uppercase().into()))),
            ("lower", Filter::new(|value, _| Ok(value.to_output().to_lowercase().into()))),
            ("capitalize", Filter::new(|value, _| Ok(capitalize(&value.to_output()).into()))),
            ("title", Filter::new(|value, _| Ok(title(&value.to_output()).into()))),
            ("trim", Filter::new(trim)),
            ("length", Filter::new(length)),
            ("default", Filter::new(default)),
            ("join", Filter::new(join)),
            ("json", Filter::new(json)),
            ("first", Filter::new(|value, _| Ok(first_or_last(value, true)))),
            ("last", Filter::new(|value, _| Ok(first_or_last(value, false)))),
            ("reverse", Filter::new(reverse)),
            ("keys", Filter::new(keys)),
            ("sort", Filter::new(sort)),
            ("round", Filter::new(round)),
            ("abs", Filter::new(abs)),
            ("replace", Filter::new(replace)),
            ("striptags", Filter::new(|value, _| Ok(strip_tags(&value.to_output()).into()))),
            ("nl2br", Filter::safe(nl2br)),
            ("url_encode", Filter::new(url_encode)),
            (
                "base64",
                Filter::new(|value, _| Ok(STANDARD.encode(value.to_output()).into())),
            ),
            ("slice", Filter::new(slice)),
            ("format_number", Filter::new(format_number)),
        ];
        filters
            .into_iter()
            .map(|(name, filter)| (name.to_string(), filter))
            .collect()
    }

    fn functions(&self) -> Vec<(String, Function)> {
        let functions = [
            ("range", Function::new(range)),
            ("min", Function::new(|args| extreme("min", args, Ordering::Less))),
            ("max", Function::new(|args| extreme("max", args, Ordering::Greater))),
            ("dump", Function::new(dump)),
        ];
        functions
            .into_iter()
            .map(|(name, function)| (name.to_string(), function))
            .collect()
    }
}

fn int_arg(callee: &str, args: &[Value], idx: usize, default: i64) -> Result<i64, RuntimeError> {
    match args.get(idx) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_i64().ok_or_else(|| {
            RuntimeError::invalid_argument(
                callee,
                format!("argument {} must be an integer, found {}", idx + 1, value.kind()),
            )
        }),
    }
}

fn str_arg(args: &[Value], idx: usize, default: &str) -> String {
    match args.get(idx) {
        None | Some(Value::Null) => default.to_string(),
        Some(value) => value.to_output(),
    }
}

fn escape(value: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(escape_html(&value.to_output()).into_owned().into())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn title(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word_start = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = true;
        }
    }
    out
}

fn trim(value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = value.to_output();
    let trimmed = match args.first() {
        Some(chars) => {
            let chars: Vec<char> = chars.to_output().chars().collect();
            text.trim_matches(chars.as_slice()).to_string()
        }
        None => text.trim().to_string(),
    };
    Ok(trimmed.into())
}

fn length(value: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    value.len().map(Value::from).ok_or_else(|| {
        RuntimeError::invalid_argument(
            "length",
            format!("expected a string, sequence or map, found {}", value.kind()),
        )
    })
}

fn default(value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    if value.is_empty() {
        Ok(args.first().cloned().unwrap_or_default())
    } else {
        Ok(value.clone())
    }
}

fn join(value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let separator = str_arg(args, 0, "");
    let items = match value {
        Value::Array(items) => items.iter().map(Value::to_output).collect::<Vec<_>>(),
        Value::Map(map) => map.values().map(Value::to_output).collect(),
        Value::Null => Vec::new(),
        other => vec![other.to_output()],
    };
    Ok(items.join(&separator).into())
}

fn json(value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let json = value.to_json();
    if args.first().is_some_and(Value::is_truthy) {
        serde_json::to_string_pretty(&json)
            .map(Value::from)
            .map_err(|e| RuntimeError::InvalidOperation(e.to_string()))
    } else {
        Ok(json.to_string().into())
    }
}

fn first_or_last(value: &Value, first: bool) -> Value {
    let picked = match value {
        Value::Array(items) if first => items.first().cloned(),
        Value::Array(items) => items.last().cloned(),
        Value::Map(map) if first => map.values().next().cloned(),
        Value::Map(map) => map.values().next_back().cloned(),
        Value::String(s) if first => s.chars().next().map(|c| c.to_string().into()),
        Value::String(s) => s.chars().next_back().map(|c| c.to_string().into()),
        _ => None,
    };
    picked.unwrap_or_default()
}

fn reverse(value: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match value {
        Value::Array(items) => Ok(Value::Array(items.iter().rev().cloned().collect())),
        Value::Map(map) => Ok(Value::Map(
            map.iter().rev().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )),
        Value::Null => Ok(Value::Null),
        other => Ok(other.to_output().chars().rev().collect::<String>().into()),
    }
}

fn keys(value: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match value {
        Value::Map(map) => Ok(map.keys().map(|k| Value::from(k.as_str())).collect::<Vec<_>>().into()),
        Value::Array(items) => Ok((0..items.len()).map(Value::from).collect::<Vec<_>>().into()),
        Value::Null => Ok(Value::Array(Vec::new())),
        other => Err(RuntimeError::invalid_argument(
            "keys",
            format!("expected a sequence or map, found {}", other.kind()),
        )),
    }
}

/// Sort a sequence, optionally by an attribute of its items
fn sort(value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut items = match value {
        Value::Array(items) => items.clone(),
        Value::Map(map) => map.values().cloned().collect(),
        Value::Null => return Ok(Value::Array(Vec::new())),
        other => {
            return Err(RuntimeError::invalid_argument(
                "sort",
                format!("expected a sequence, found {}", other.kind()),
            ))
        }
    };
    let attr = args.first().map(Value::to_output);
    let mut failure = None;
    items.sort_by(|a, b| {
        let (a, b) = match &attr {
            Some(attr) => (a.get_attr(attr), b.get_attr(attr)),
            None => (a.clone(), b.clone()),
        };
        a.compare(&b).unwrap_or_else(|| {
            failure.get_or_insert_with(|| format!("cannot compare {} with {}", a.kind(), b.kind()));
            Ordering::Equal
        })
    });
    match failure {
        Some(message) => Err(RuntimeError::invalid_argument("sort", message)),
        None => Ok(Value::Array(items)),
    }
}

/// `round(precision = 0, method = "common")`; method is `common`, `ceil` or `floor`
///
/// With precision 0 the result is an integer.
fn round(value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let number = value.as_f64().ok_or_else(|| {
        RuntimeError::invalid_argument("round", format!("expected a number, found {}", value.kind()))
    })?;
    let precision = int_arg("round", args, 0, 0)?;
    let precision = i32::try_from(precision)
        .map_err(|_| RuntimeError::invalid_argument("round", "precision out of range"))?;
    let factor = 10f64.powi(precision);
    let scaled = number * factor;
    let rounded = match str_arg(args, 1, "common").as_str() {
        "common" => scaled.round(),
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        other => {
            return Err(RuntimeError::invalid_argument(
                "round",
                format!("unknown method `{}`", other),
            ))
        }
    } / factor;

    if precision == 0 && rounded.abs() < i64::MAX as f64 {
        Ok(Value::Int(rounded as i64))
    } else {
        Ok(Value::Float(rounded))
    }
}

fn abs(value: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match value {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::InvalidOperation("integer overflow".to_string())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(RuntimeError::invalid_argument(
            "abs",
            format!("expected a number, found {}", other.kind()),
        )),
    }
}

/// `replace(from, to)` or `replace({from: to, ...})`
fn replace(value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut text = value.to_output();
    match args {
        [Value::Map(pairs)] => {
            for (from, to) in pairs {
                if !from.is_empty() {
                    text = text.replace(from.as_str(), &to.to_output());
                }
            }
        }
        [from, to] => {
            let from = from.to_output();
            if !from.is_empty() {
                text = text.replace(&from, &to.to_output());
            }
        }
        _ => {
            return Err(RuntimeError::invalid_argument(
                "replace",
                "expected a map of replacements or two strings",
            ))
        }
    }
    Ok(text.into())
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn nl2br(value: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    let escaped = escape_html(&value.to_output()).into_owned();
    Ok(escaped.replace("\r\n", "\n").replace('\n', "<br />\n").into())
}

fn url_encode(value: &Value, _: &[Value]) -> Result<Value, RuntimeError> {
    match value {
        Value::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(&v.to_output())))
            .collect::<Vec<_>>()
            .join("&")
            .into()),
        other => Ok(percent_encode(&other.to_output()).into()),
    }
}

fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Resolve `start`/`length` against a sequence of `len` items
///
/// A negative start counts from the end; a negative length stops that many
/// items before the end.
fn slice_bounds(len: usize, start: i64, length: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let start = if start < 0 {
        (len + start).max(0)
    } else {
        start.min(len)
    };
    let end = match length {
        Some(n) if n < 0 => len + n,
        Some(n) => start.saturating_add(n).min(len),
        None => len,
    };
    (start as usize, end.max(start) as usize)
}

fn slice(value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let start = int_arg("slice", args, 0, 0)?;
    let length = match args.get(1) {
        None | Some(Value::Null) => None,
        Some(_) => Some(int_arg("slice", args, 1, 0)?),
    };
    match value {
        Value::Array(items) => {
            let (from, to) = slice_bounds(items.len(), start, length);
            Ok(Value::Array(items[from..to].to_vec()))
        }
        Value::Map(map) => {
            let (from, to) = slice_bounds(map.len(), start, length);
            Ok(Value::Map(
                map.iter()
                    .skip(from)
                    .take(to - from)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<IndexMap<_, _>>(),
            ))
        }
        other => {
            let chars: Vec<char> = other.to_output().chars().collect();
            let (from, to) = slice_bounds(chars.len(), start, length);
            Ok(chars[from..to].iter().collect::<String>().into())
        }
    }
}

/// `format_number(decimals = 0, dec_point = ".", thousands_sep = ",")`
fn format_number(value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let number = match value {
        Value::Null => 0.0,
        other => other.as_f64().ok_or_else(|| {
            RuntimeError::invalid_argument(
                "format_number",
                format!("expected a number, found {}", other.kind()),
            )
        })?,
    };
    let decimals = usize::try_from(int_arg("format_number", args, 0, 0)?)
        .map_err(|_| RuntimeError::invalid_argument("format_number", "decimals must not be negative"))?;
    let dec_point = str_arg(args, 1, ".");
    let thousands_sep = str_arg(args, 2, ",");

    let digits = format!("{:.*}", decimals, number.abs());
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits.as_str(), None),
    };

    let mut out = String::new();
    if number < 0.0 && digits.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    for (idx, c) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            out.push_str(&thousands_sep);
        }
        out.push(c);
    }
    if let Some(fraction) = fraction {
        out.push_str(&dec_point);
        out.push_str(fraction);
    }
    Ok(out.into())
}

/// `range(end)` counts from 0 up to `end` exclusive; `range(start, end, step)`
/// is inclusive of `end`
fn range(args: &[Value]) -> Result<Value, RuntimeError> {
    let (start, end, step) = match args.len() {
        0 => return Err(RuntimeError::invalid_argument("range", "expected at least one argument")),
        1 => {
            let end = int_arg("range", args, 0, 0)?;
            (0, end.saturating_sub(1), 1)
        }
        _ => {
            let start = int_arg("range", args, 0, 0)?;
            let end = int_arg("range", args, 1, 0)?;
            let step = int_arg("range", args, 2, if start <= end { 1 } else { -1 })?;
            (start, end, step)
        }
    };
    if step == 0 {
        return Err(RuntimeError::invalid_argument("range", "step must not be zero"));
    }

    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current <= end) || (step < 0 && current >= end) {
        if items.len() == RANGE_LIMIT {
            return Err(RuntimeError::invalid_argument(
                "range",
                format!("more than {} items", RANGE_LIMIT),
            ));
        }
        items.push(Value::Int(current));
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(Value::Array(items))
}

/// Smallest or largest of the arguments, or of a single sequence argument
fn extreme(callee: &str, args: &[Value], wanted: Ordering) -> Result<Value, RuntimeError> {
    let items = match args {
        [Value::Array(items)] => items.as_slice(),
        args => args,
    };
    let mut best: Option<&Value> = None;
    for item in items {
        best = match best {
            None => Some(item),
            Some(current) => {
                let ordering = item.compare(current).ok_or_else(|| {
                    RuntimeError::invalid_argument(
                        callee,
                        format!("cannot compare {} with {}", item.kind(), current.kind()),
                    )
                })?;
                Some(if ordering == wanted { item } else { current })
            }
        };
    }
    Ok(best.cloned().unwrap_or_default())
}

/// Pretty JSON of the arguments, for debugging templates
fn dump(args: &[Value]) -> Result<Value, RuntimeError> {
    let json = match args {
        [] => serde_json::Value::Null,
        [single] => single.to_json(),
        many => serde_json::Value::Array(many.iter().map(Value::to_json).collect()),
    };
    serde_json::to_string_pretty(&json)
        .map(Value::from)
        .map_err(|e| RuntimeError::InvalidOperation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(name: &str, value: impl Into<Value>, args: &[Value]) -> Result<Value, RuntimeError> {
        let filters = CoreExtension.filters();
        let (_, filter) = filters
            .iter()
            .find(|(n, _)| n == name)
            .unwrap_or_else(|| panic!("no filter {}", name));
        filter.call(&value.into(), args)
    }

    fn function(name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let functions = CoreExtension.functions();
        let (_, function) = functions.iter().find(|(n, _)| n == name).unwrap();
        function.call(args)
    }

    #[test]
    fn test_safe_flags() {
        let filters = CoreExtension.filters();
        let safe: Vec<&str> = filters
            .iter()
            .filter(|(_, f)| f.is_safe())
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(safe, vec!["raw", "escape", "e", "nl2br"]);
    }

    #[test]
    fn test_case_filters() {
        assert_eq!(filter("upper", "abc", &[]), Ok("ABC".into()));
        assert_eq!(filter("capitalize", "hELLO world", &[]), Ok("Hello world".into()));
        assert_eq!(filter("title", "the quick-brown fox", &[]), Ok("The Quick-Brown Fox".into()));
        assert_eq!(filter("trim", "  x  ", &[]), Ok("x".into()));
        assert_eq!(filter("trim", "--x-", &["-".into()]), Ok("x".into()));
    }

    #[test]
    fn test_length_and_default() {
        assert_eq!(filter("length", vec![1, 2, 3], &[]), Ok(3.into()));
        assert_eq!(filter("length", "héllo", &[]), Ok(5.into()));
        assert!(filter("length", 4, &[]).is_err());
        assert_eq!(filter("default", Value::Null, &["n/a".into()]), Ok("n/a".into()));
        assert_eq!(filter("default", "", &["n/a".into()]), Ok("n/a".into()));
        assert_eq!(filter("default", 0, &["n/a".into()]), Ok(0.into()));
    }

    #[test]
    fn test_sequence_filters() {
        let items = Value::from(vec!["b", "c", "a"]);
        assert_eq!(filter("join", items.clone(), &[", ".into()]), Ok("b, c, a".into()));
        assert_eq!(filter("first", items.clone(), &[]), Ok("b".into()));
        assert_eq!(filter("last", items.clone(), &[]), Ok("a".into()));
        assert_eq!(filter("sort", items.clone(), &[]), Ok(vec!["a", "b", "c"].into()));
        assert_eq!(filter("reverse", items.clone(), &[]), Ok(vec!["a", "c", "b"].into()));
        assert_eq!(filter("slice", items, &[1.into(), 1.into()]), Ok(vec!["c"].into()));
        assert_eq!(filter("slice", "abcdef", &[(-2).into()]), Ok("ef".into()));
        assert!(filter("sort", vec![Value::from(1), Value::from("a")], &[]).is_err());
    }

    #[test]
    fn test_sort_by_attribute() {
        let people = Value::Array(vec![
            [("name", "Zoe")].into_iter().collect(),
            [("name", "Al")].into_iter().collect(),
        ]);
        let sorted = filter("sort", people, &["name".into()]).unwrap();
        assert_eq!(sorted.get_item(&0.into()).get_attr("name"), Value::from("Al"));
    }

    #[test]
    fn test_keys_keep_insertion_order() {
        let map: Value = [("z", 1), ("a", 2)].into_iter().collect();
        assert_eq!(filter("keys", map, &[]), Ok(vec!["z", "a"].into()));
    }

    #[test]
    fn test_numeric_filters() {
        assert_eq!(filter("round", 2.5, &[]), Ok(3.into()));
        assert_eq!(filter("round", 1.23456, &[2.into()]), Ok(Value::Float(1.23)));
        assert_eq!(filter("round", 2.1, &[0.into(), "ceil".into()]), Ok(3.into()));
        assert!(filter("round", 2.1, &[0.into(), "up".into()]).is_err());
        assert_eq!(filter("abs", -4, &[]), Ok(4.into()));
        assert_eq!(filter("format_number", 1234567.891, &[2.into()]), Ok("1,234,567.89".into()));
        assert_eq!(
            filter("format_number", -1234.5, &[1.into(), ",".into(), ".".into()]),
            Ok("-1.234,5".into())
        );
        assert_eq!(filter("format_number", 999, &[]), Ok("999".into()));
    }

    #[test]
    fn test_markup_filters() {
        assert_eq!(filter("escape", "<b>", &[]), Ok("&lt;b&gt;".into()));
        assert_eq!(filter("striptags", "<p>Hi <b>there</b></p>", &[]), Ok("Hi there".into()));
        assert_eq!(filter("nl2br", "a<\nb", &[]), Ok("a&lt;<br />\nb".into()));
    }

    #[test]
    fn test_replace() {
        assert_eq!(filter("replace", "a-b", &["-".into(), "+".into()]), Ok("a+b".into()));
        let pairs: Value = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(filter("replace", "abc", &[pairs]), Ok("12c".into()));
        assert!(filter("replace", "abc", &[]).is_err());
    }

    #[test]
    fn test_encoding_filters() {
        assert_eq!(filter("url_encode", "a b&c/é", &[]), Ok("a%20b%26c%2F%C3%A9".into()));
        let query: Value = [("q", "x y"), ("page", "2")].into_iter().collect();
        assert_eq!(filter("url_encode", query, &[]), Ok("q=x%20y&page=2".into()));
        assert_eq!(filter("base64", "hello", &[]), Ok("aGVsbG8=".into()));
        let data: Value = [("a", 1)].into_iter().collect();
        assert_eq!(filter("json", data, &[]), Ok(r#"{"a":1}"#.into()));
    }

    #[test]
    fn test_range() {
        assert_eq!(function("range", &[3.into()]), Ok(vec![0, 1, 2].into()));
        assert_eq!(function("range", &[1.into(), 3.into()]), Ok(vec![1, 2, 3].into()));
        assert_eq!(function("range", &[3.into(), 1.into()]), Ok(vec![3, 2, 1].into()));
        assert_eq!(
            function("range", &[0.into(), 10.into(), 5.into()]),
            Ok(vec![0, 5, 10].into())
        );
        assert!(function("range", &[0.into(), 3.into(), 0.into()]).is_err());
        assert!(function("range", &[0.into(), 1_000_000.into()]).is_err());
    }

    #[test]
    fn test_min_max() {
        assert_eq!(function("max", &[1.into(), 7.into(), 3.into()]), Ok(7.into()));
        assert_eq!(function("min", &[Value::from(vec![4, 2, 9])]), Ok(2.into()));
        assert_eq!(function("min", &[]), Ok(Value::Null));
        assert!(function("max", &[1.into(), "a".into()]).is_err());
    }

    #[test]
    fn test_dump() {
        assert_eq!(function("dump", &[vec![1, 2].into()]), Ok("[\n  1,\n  2\n]".into()));
    }
}

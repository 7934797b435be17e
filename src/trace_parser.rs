//! Tokenizes one line of `strace -q -s 8`/`dtruss` output into a function
//! call with its arguments and return value. Reconstructed
//! from `trace_process_line()`/`_extract_argument()`/`_is_escaped()` in
//! `trace.c`, expressed without the original's in-place NUL-byte
//! destruction of the input buffer.

use crate::error::LineParseError;

pub const MAX_FUNCTION_ARGUMENTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerFlavor {
    Strace,
    Dtruss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCall {
    pub func_name: String,
    pub args: Vec<String>,
    pub result: Option<String>,
}

/// Parses a single trace line. Never panics on malformed input; anything
/// that isn't shaped like `name(args...) = result` is reported via
/// `LineParseError` for the caller to log and skip.
pub fn parse_line(raw_line: &str, flavor: TracerFlavor) -> Result<ParsedCall, LineParseError> {
    let line = raw_line.trim_end_matches(['\n', '\r']);

    let paren = line
        .find('(')
        .ok_or_else(|| LineParseError::NotAFunctionCall(line.to_owned()))?;
    let mut func_name = line[..paren].to_owned();
    let mut rest = &line[paren + 1..];

    let mut args = Vec::new();
    while let Some((value, remainder)) = extract_argument(rest, flavor)? {
        if args.len() >= MAX_FUNCTION_ARGUMENTS {
            return Err(LineParseError::TooManyArgs(args.len()));
        }
        args.push(value);
        rest = remainder;
    }

    let result = rest.find('=').map(|eq_idx| {
        let after_eq = rest[eq_idx + 1..].trim_start_matches([' ', '=']);
        let mut result = after_eq.to_owned();
        if flavor == TracerFlavor::Dtruss {
            // Apple's dtruss prints two values for a return ("0 0"); we
            // only want the first.
            if let Some(space_idx) = result.find(' ') {
                result.truncate(space_idx);
            }
        }
        result
    });

    // Apple wraps every syscall with a _nocancel variant; fold it back to
    // the name callers expect.
    if let Some(idx) = func_name.find("_nocancel") {
        func_name.truncate(idx);
    }

    Ok(ParsedCall {
        func_name,
        args,
        result,
    })
}

/// Extracts the next argument from `s` (text following the opening paren or
/// a previous argument's delimiter). Returns `Ok(None)` when there is
/// nothing left to extract, either because no closing delimiter was found
/// (a truncated line) or because the argument was empty — both terminate
/// parsing early rather than skip a single argument, matching
/// `_extract_argument()`'s behavior. A quoted argument that never closes is
/// the one shape worth reporting rather than silently swallowing.
fn extract_argument<'a>(s: &'a str, flavor: TracerFlavor) -> Result<Option<(String, &'a str)>, LineParseError> {
    let trimmed = s.trim_start_matches(' ');

    if let Some(rest) = trimmed.strip_prefix('"') {
        let (value, after) = find_quoted_value(rest, flavor)?;
        let Some(delim) = after.find([',', ')']) else {
            return Ok(None);
        };
        Ok(Some((value, &after[delim + 1..])))
    } else if let Some(rest) = trimmed.strip_prefix('{') {
        let Some(end) = rest.find('}') else {
            return Ok(None);
        };
        let value = rest[..end].to_owned();
        let after = &rest[end + 1..];
        let Some(delim) = after.find([',', ')']) else {
            return Ok(None);
        };
        Ok(Some((value, &after[delim + 1..])))
    } else {
        let Some(delim) = trimmed.find([',', ')']) else {
            return Ok(None);
        };
        if delim == 0 {
            return Ok(None);
        }
        Ok(Some((trimmed[..delim].to_owned(), &trimmed[delim + 1..])))
    }
}

/// Finds the closing double-quote, skipping over escaped ones, and returns
/// the unescaped value together with the remainder after the quote. A
/// quote that never closes on this line is reported as `UnterminatedQuote`
/// rather than treated as a truncated-but-valid line.
fn find_quoted_value(rest: &str, flavor: TracerFlavor) -> Result<(String, &str), LineParseError> {
    let mut search_from = 0usize;
    loop {
        match rest[search_from..].find('"') {
            None => return Err(LineParseError::UnterminatedQuote),
            Some(off) => {
                let idx = search_from + off;
                if !is_escaped(rest, idx) {
                    let mut value = rest[..idx].to_owned();
                    if flavor == TracerFlavor::Dtruss && value.ends_with("\\0") {
                        value.truncate(value.len() - 2);
                    }
                    return Ok((value, &rest[idx + 1..]));
                }
                search_from = idx + 1;
            }
        }
    }
}

/// True if the double-quote at byte offset `idx` is preceded by an odd run
/// of backslashes.
fn is_escaped(s: &str, idx: usize) -> bool {
    let bytes = s.as_bytes();
    let mut count = 0;
    let mut i = idx;
    while i > 0 && bytes[i - 1] == b'\\' {
        count += 1;
        i -= 1;
    }
    count % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_parses_open_call() {
        let call = parse_line(
            r#"open("/var/lib/postgresql/9.1/main/base/16386/12345", O_RDWR) = 7"#,
            TracerFlavor::Strace,
        )
        .unwrap();
        assert_eq!(call.func_name, "open");
        assert_eq!(
            call.args,
            vec!["/var/lib/postgresql/9.1/main/base/16386/12345", "O_RDWR"]
        );
        assert_eq!(call.result.as_deref(), Some("7"));
    }

    #[test]
    fn parser_quoting_handles_escaped_quotes() {
        let call = parse_line(r#"write(3, "she said \"hi\"", 14) = 14"#, TracerFlavor::Strace).unwrap();
        assert_eq!(call.args[1], r#"she said \"hi\""#);
    }

    #[test]
    fn parser_braces_handles_struct_group() {
        let call = parse_line(r#"lseek(3, {SEEK_SET, 0}, 0) = 0"#, TracerFlavor::Strace).unwrap();
        assert_eq!(call.args[1], "SEEK_SET, 0");
    }

    #[test]
    fn parser_result_handles_bare_and_equals_spacing() {
        let call = parse_line("close(4)             = 0", TracerFlavor::Strace).unwrap();
        assert_eq!(call.result.as_deref(), Some("0"));
    }

    #[test]
    fn dtruss_strips_trailing_nul_run_and_nocancel_suffix() {
        let call = parse_line(
            r#"read_nocancel(0x5, "hello\0", 0x400)		 = 5 0"#,
            TracerFlavor::Dtruss,
        )
        .unwrap();
        assert_eq!(call.func_name, "read");
        assert_eq!(call.args[1], "hello");
        assert_eq!(call.result.as_deref(), Some("5"));
    }

    #[test]
    fn missing_parenthesis_is_not_a_function_call() {
        let err = parse_line("not a syscall line at all", TracerFlavor::Strace).unwrap_err();
        assert!(matches!(err, LineParseError::NotAFunctionCall(_)));
    }

    #[test]
    fn too_many_arguments_is_rejected() {
        let many = (0..40).map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
        let line = format!("foo({many}) = 0");
        let err = parse_line(&line, TracerFlavor::Strace).unwrap_err();
        assert!(matches!(err, LineParseError::TooManyArgs(MAX_FUNCTION_ARGUMENTS)));
    }

    #[test]
    fn call_with_no_arguments() {
        let call = parse_line("getpid() = 1234", TracerFlavor::Strace).unwrap();
        assert!(call.args.is_empty());
        assert_eq!(call.result.as_deref(), Some("1234"));
    }

    #[test]
    fn unterminated_quote_is_reported() {
        let err = parse_line(r#"write(3, "cut off mid-strin"#, TracerFlavor::Strace).unwrap_err();
        assert_eq!(err, LineParseError::UnterminatedQuote);
    }
}

//! A minimal scanner for OpenCL C kernel declarations.
//!
//! The host device does not compile OpenCL C, it only needs to know which kernels a source declares
//! and how many parameters each of them takes, so it can check them against the registered host implementations.

use itertools::Itertools;
use thiserror::Error;

/// A `__kernel` function declaration.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KernelSignature {
    pub name: String,
    pub params: Vec<Param>,
    /// 1-based line of the `__kernel` keyword.
    pub line: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Param {
    /// The full declaration text, whitespace normalized.
    pub decl: String,
    pub name: String,
    pub pointer: bool,
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ScanError {
    #[error("line {line}: expected a parameter list after kernel '{name}'")]
    MissingParams { name: String, line: usize },
    #[error("line {line}: unterminated parameter list of kernel '{name}'")]
    Unterminated { name: String, line: usize },
    #[error("line {line}: kernel declaration without a name")]
    MissingName { line: usize },
}

impl KernelSignature {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Find all kernel declarations in `source`, in source order.
pub fn scan_kernels(source: &str) -> Result<Vec<KernelSignature>, ScanError> {
    let code = strip_comments(source);
    let bytes = code.as_bytes();

    let mut result = vec![];
    let mut i = 0;

    while let Some((start, end)) = next_word(&code, i) {
        i = end;
        let word = &code[start..end];
        if word != "__kernel" && word != "kernel" {
            continue;
        }
        let line = line_of(&code, start);

        // the name is the last identifier before the opening paren
        let open = match code[end..].find(|c: char| c == '(' || c == ';' || c == '{') {
            Some(offset) if bytes[end + offset] == b'(' => end + offset,
            _ => {
                let name = last_word(&code[end..]).unwrap_or_default().to_owned();
                return Err(ScanError::MissingParams { name, line });
            }
        };
        let name = last_word(&code[end..open]).ok_or(ScanError::MissingName { line })?.to_owned();

        let close = matching_paren(bytes, open).ok_or_else(|| ScanError::Unterminated {
            name: name.clone(),
            line,
        })?;

        let params = split_params(&code[open + 1..close]);
        result.push(KernelSignature { name, params, line });
        i = close + 1;
    }

    Ok(result)
}

fn split_params(list: &str) -> Vec<Param> {
    let list = list.trim();
    if list.is_empty() || list == "void" {
        return vec![];
    }

    list.split(',')
        .map(|decl| {
            let decl = decl.split_whitespace().join(" ");
            Param {
                name: last_word(&decl).unwrap_or_default().to_owned(),
                pointer: decl.contains('*') || decl.ends_with(']'),
                decl,
            }
        })
        .collect()
}

/// Replace comments by spaces, keeping newlines so line numbers stay valid.
fn strip_comments(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        match (c, next) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    result.push(if c == '\n' { '\n' } else { ' ' });
                    prev = c;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// The byte range of the next identifier-like word starting at or after `from`.
fn next_word(s: &str, from: usize) -> Option<(usize, usize)> {
    let rest = &s[from..];
    let start = from + rest.find(is_ident)?;
    let end = s[start..].find(|c: char| !is_ident(c)).map_or(s.len(), |len| start + len);
    Some((start, end))
}

fn last_word(s: &str) -> Option<&str> {
    s.split(|c: char| !is_ident(c)).filter(|w| !w.is_empty()).last()
}

fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn line_of(s: &str, offset: usize) -> usize {
    s[..offset].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = "
// squares a vector
__kernel void square(__global const float *input, __global float *output) {
    int i = get_global_id(0);
    output[i] = input[i] * input[i];
}
";

    #[test]
    fn square() {
        let kernels = scan_kernels(SQUARE).unwrap();
        assert_eq!(kernels.len(), 1);

        let square = &kernels[0];
        assert_eq!(square.name, "square");
        assert_eq!(square.line, 3);
        assert_eq!(square.arity(), 2);
        assert_eq!(square.params[0].decl, "__global const float *input");
        assert_eq!(square.params[0].name, "input");
        assert!(square.params[1].pointer);
    }

    #[test]
    fn multiple_kernels_and_comments() {
        let source = "
/* kernel void commented(int a) */
kernel void scale(__global float *x, const float factor, __global float *y) {}
float helper(float x) { return x; }
__kernel void nothing(void) {}
";
        let kernels = scan_kernels(source).unwrap();
        assert_eq!(kernels.iter().map(|k| k.name.as_str()).collect_vec(), vec!["scale", "nothing"]);
        assert_eq!(kernels[0].arity(), 3);
        assert!(!kernels[0].params[1].pointer);
        assert_eq!(kernels[1].arity(), 0);

        assert!(kernels.iter().all(|k| k.name != "helper"));
        assert_eq!(kernels[0].line, 3);
    }

    #[test]
    fn identifiers_containing_kernel() {
        let source = "int my_kernel_count;\n__kernel void f(int kernel_size) {}";
        let kernels = scan_kernels(source).unwrap();
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].params[0].name, "kernel_size");
    }

    #[test]
    fn malformed() {
        assert_eq!(
            scan_kernels("__kernel void f(int a {").unwrap_err(),
            ScanError::Unterminated {
                name: "f".to_owned(),
                line: 1
            }
        );
        assert!(matches!(
            scan_kernels("\n__kernel void g;").unwrap_err(),
            ScanError::MissingParams { line: 2, .. }
        ));
    }
}

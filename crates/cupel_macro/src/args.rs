//! Parsing for `#[cupel(...)]` attribute arguments.
//!
//! The attribute accepts a comma-separated list of settings. Every setting
//! may appear at most once; `cases` and `matrix` are mutually exclusive.
//! Parse errors carry a `help:` line showing the accepted form.

use syn::parse::{Parse, ParseStream};
use syn::{Expr, ExprArray, ExprLit, ExprTuple, Ident, Lit, LitInt, LitStr, Result, Token, bracketed};

/// A file staged into the sandbox before the test body runs.
#[derive(Debug)]
pub struct IncludeSpec {
    pub source: String,
    /// Sandbox-relative destination; `None` keeps the source's own layout.
    pub dest: Option<String>,
}

/// A named argument set for `cases = [...]`.
#[derive(Debug)]
pub struct NamedCase {
    pub name: Ident,
    pub args: ExprTuple,
}

/// One axis of a `matrix = [...]` expansion.
#[derive(Debug)]
pub struct MatrixParam {
    pub name: Ident,
    pub values: Vec<Expr>,
}

/// Everything a `#[cupel(...)]` attribute can carry.
#[derive(Default, Debug)]
pub struct CupelArgs {
    pub include: Option<Vec<IncludeSpec>>,
    pub env: Option<Vec<(String, String)>>,
    pub setup: Option<Expr>,
    pub teardown: Option<Expr>,
    pub ignore: bool,
    pub should_panic: bool,
    /// Deadline for the forked child, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Total attempts; 1 means run once with no retry.
    pub retries: Option<u32>,
    pub cases: Option<Vec<NamedCase>>,
    pub matrix: Option<Vec<MatrixParam>>,
}

impl Parse for CupelArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut out = CupelArgs::default();

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            match key.to_string().as_str() {
                "ignore" => {
                    reject_duplicate(out.ignore, &key)?;
                    out.ignore = true;
                }
                "should_panic" => {
                    reject_duplicate(out.should_panic, &key)?;
                    out.should_panic = true;
                }
                "include" => {
                    reject_duplicate(out.include.is_some(), &key)?;
                    out.include = Some(parse_include(input)?);
                }
                "env" => {
                    reject_duplicate(out.env.is_some(), &key)?;
                    out.env = Some(parse_env(input)?);
                }
                "setup" => {
                    reject_duplicate(out.setup.is_some(), &key)?;
                    expect_eq(input, "setup", "setup = my_setup_fn()")?;
                    out.setup = Some(input.parse()?);
                }
                "teardown" => {
                    reject_duplicate(out.teardown.is_some(), &key)?;
                    expect_eq(input, "teardown", "teardown = my_teardown_fn()")?;
                    out.teardown = Some(input.parse()?);
                }
                "timeout" => {
                    reject_duplicate(out.timeout_ms.is_some(), &key)?;
                    expect_eq(input, "timeout", "timeout = \"30s\"")?;
                    let lit: LitStr = input.parse().map_err(|e| {
                        syn::Error::new(
                            e.span(),
                            "expected a string after `timeout =`\nhelp: use `timeout = \"30s\"` or `timeout = \"500ms\"`",
                        )
                    })?;
                    let millis = parse_duration_ms(&lit.value())
                        .map_err(|msg| syn::Error::new_spanned(&lit, msg))?;
                    out.timeout_ms = Some(millis);
                }
                "retries" => {
                    reject_duplicate(out.retries.is_some(), &key)?;
                    expect_eq(input, "retries", "retries = 3")?;
                    let lit: LitInt = input.parse().map_err(|e| {
                        syn::Error::new(e.span(), "expected an integer after `retries =`\nhelp: use `retries = 3`")
                    })?;
                    let count: u32 = lit.base10_parse()?;
                    if count == 0 {
                        return Err(syn::Error::new_spanned(
                            &lit,
                            "retries cannot be zero\nhelp: `retries = 1` runs once with no retry",
                        ));
                    }
                    out.retries = Some(count);
                }
                "cases" => {
                    reject_duplicate(out.cases.is_some(), &key)?;
                    if out.matrix.is_some() {
                        return Err(exclusive_error(&key));
                    }
                    expect_eq(input, "cases", "cases = [small: (1, 2)]")?;
                    out.cases = Some(parse_cases(input)?);
                }
                "matrix" => {
                    reject_duplicate(out.matrix.is_some(), &key)?;
                    if out.cases.is_some() {
                        return Err(exclusive_error(&key));
                    }
                    expect_eq(input, "matrix", "matrix = [x: [1, 2]]")?;
                    out.matrix = Some(parse_matrix(input)?);
                }
                unknown => return Err(unknown_setting(&key, unknown)),
            }

            if input.is_empty() {
                break;
            }
            input.parse::<Token![,]>()?;
        }

        Ok(out)
    }
}

fn reject_duplicate(already_set: bool, key: &Ident) -> Result<()> {
    if already_set {
        return Err(syn::Error::new_spanned(key, format!("duplicate `{key}` setting")));
    }
    Ok(())
}

fn exclusive_error(key: &Ident) -> syn::Error {
    syn::Error::new_spanned(
        key,
        "`cases` and `matrix` are mutually exclusive\nhelp: pick one way of parameterizing the test",
    )
}

fn expect_eq(input: ParseStream, name: &str, example: &str) -> Result<()> {
    input
        .parse::<Token![=]>()
        .map_err(|e| syn::Error::new(e.span(), format!("expected `=` after `{name}`\nhelp: use `{example}`")))?;
    Ok(())
}

fn unknown_setting(key: &Ident, unknown: &str) -> syn::Error {
    let suggestion = match unknown {
        "includes" | "files" => Some("include"),
        "envs" | "environment" => Some("env"),
        "ignored" | "skip" => Some("ignore"),
        "panic" | "panics" => Some("should_panic"),
        "before" | "before_each" => Some("setup"),
        "after" | "after_each" | "cleanup" => Some("teardown"),
        "time_limit" | "deadline" => Some("timeout"),
        "retry" | "attempts" | "flaky" => Some("retries"),
        "case" | "params" => Some("cases"),
        "combinations" | "parametrize" => Some("matrix"),
        _ => None,
    };
    let valid = "include, env, setup, teardown, ignore, should_panic, timeout, retries, cases, matrix";
    let message = match suggestion {
        Some(meant) => format!("unknown setting `{unknown}`\nhelp: did you mean `{meant}`?\nvalid settings are: {valid}"),
        None => format!("unknown setting `{unknown}`\nvalid settings are: {valid}"),
    };
    syn::Error::new_spanned(key, message)
}

/// `include = ["file", ("source", "dest"), ...]`
fn parse_include(input: ParseStream) -> Result<Vec<IncludeSpec>> {
    expect_eq(input, "include", "include = [\"file.txt\"]")?;
    let array: ExprArray = input.parse().map_err(|e| {
        syn::Error::new(
            e.span(),
            "expected an array after `include =`\nhelp: use `include = [\"file.txt\", (\"src.txt\", \"dest.txt\")]`",
        )
    })?;
    if array.elems.is_empty() {
        return Err(syn::Error::new_spanned(
            &array,
            "include cannot be empty\nhelp: name at least one file, e.g. `include = [\"Cargo.toml\"]`",
        ));
    }

    let mut files = Vec::new();
    for elem in &array.elems {
        match elem {
            Expr::Lit(ExprLit { lit: Lit::Str(source), .. }) => {
                files.push(IncludeSpec {
                    source: source.value(),
                    dest: None,
                });
            }
            Expr::Tuple(tuple) => {
                let (source, dest) = parse_str_pair(tuple, "include", "(\"source.txt\", \"dest.txt\")")?;
                files.push(IncludeSpec {
                    source,
                    dest: Some(dest),
                });
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "include entries must be string literals or (source, dest) tuples\nhelp: use `include = [\"file.txt\"]` or `include = [(\"src.txt\", \"dest.txt\")]`",
                ));
            }
        }
    }
    Ok(files)
}

/// `env = [("KEY", "value"), ...]`
fn parse_env(input: ParseStream) -> Result<Vec<(String, String)>> {
    expect_eq(input, "env", "env = [(\"KEY\", \"value\")]")?;
    let array: ExprArray = input.parse().map_err(|e| {
        syn::Error::new(e.span(), "expected an array after `env =`\nhelp: use `env = [(\"KEY\", \"value\")]`")
    })?;
    if array.elems.is_empty() {
        return Err(syn::Error::new_spanned(
            &array,
            "env cannot be empty\nhelp: set at least one variable, e.g. `env = [(\"KEY\", \"value\")]`",
        ));
    }

    let mut vars = Vec::new();
    for elem in &array.elems {
        let Expr::Tuple(tuple) = elem else {
            return Err(syn::Error::new_spanned(
                elem,
                "env entries must be (key, value) tuples\nhelp: use `env = [(\"KEY\", \"value\")]`",
            ));
        };
        vars.push(parse_str_pair(tuple, "env", "(\"KEY\", \"value\")")?);
    }
    Ok(vars)
}

/// A 2-tuple of string literals, used by both `include` and `env`.
fn parse_str_pair(tuple: &ExprTuple, setting: &str, example: &str) -> Result<(String, String)> {
    if tuple.elems.len() != 2 {
        return Err(syn::Error::new_spanned(
            tuple,
            format!(
                "{setting} tuples must have exactly 2 elements, found {}\nhelp: use `{example}`",
                tuple.elems.len()
            ),
        ));
    }
    let mut parts = tuple.elems.iter().map(|elem| match elem {
        Expr::Lit(ExprLit { lit: Lit::Str(s), .. }) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(
            other,
            format!("{setting} tuple elements must be string literals\nhelp: use `{example}`"),
        )),
    });
    // len() == 2 was checked above
    let first = parts.next().unwrap_or_else(|| unreachable!())?;
    let second = parts.next().unwrap_or_else(|| unreachable!())?;
    Ok((first, second))
}

/// `cases = [name: (arg, ...), ...]`
fn parse_cases(input: ParseStream) -> Result<Vec<NamedCase>> {
    let content;
    bracketed!(content in input);

    let mut cases: Vec<NamedCase> = Vec::new();
    while !content.is_empty() {
        let name: Ident = content.parse().map_err(|e| {
            syn::Error::new(e.span(), "expected a case name\nhelp: use `cases = [small: (1, 2)]`")
        })?;
        content.parse::<Token![:]>().map_err(|e| {
            syn::Error::new(e.span(), "expected `:` after the case name\nhelp: use `cases = [small: (1, 2)]`")
        })?;
        let args: ExprTuple = content.parse().map_err(|e| {
            syn::Error::new(
                e.span(),
                "expected an argument tuple\nhelp: use `cases = [small: (1, 2)]` (single arguments need a trailing comma: `(1,)`)",
            )
        })?;

        if cases.iter().any(|case| case.name == name) {
            return Err(syn::Error::new_spanned(&name, format!("duplicate case name `{name}`")));
        }
        cases.push(NamedCase { name, args });

        if content.peek(Token![,]) {
            content.parse::<Token![,]>()?;
        }
    }

    if cases.is_empty() {
        return Err(content.error("cases cannot be empty\nhelp: name at least one case, e.g. `cases = [small: (1, 2)]`"));
    }
    Ok(cases)
}

/// `matrix = [param: [value, ...], ...]`
fn parse_matrix(input: ParseStream) -> Result<Vec<MatrixParam>> {
    let content;
    bracketed!(content in input);

    let mut params: Vec<MatrixParam> = Vec::new();
    while !content.is_empty() {
        let name: Ident = content.parse().map_err(|e| {
            syn::Error::new(e.span(), "expected a parameter name\nhelp: use `matrix = [x: [1, 2]]`")
        })?;
        content.parse::<Token![:]>().map_err(|e| {
            syn::Error::new(e.span(), "expected `:` after the parameter name\nhelp: use `matrix = [x: [1, 2]]`")
        })?;

        let values_content;
        bracketed!(values_content in content);
        let values: Vec<Expr> = values_content
            .parse_terminated(Expr::parse, Token![,])?
            .into_iter()
            .collect();
        if values.is_empty() {
            return Err(syn::Error::new_spanned(
                &name,
                format!("matrix parameter `{name}` has no values\nhelp: give it at least one value"),
            ));
        }

        if params.iter().any(|param| param.name == name) {
            return Err(syn::Error::new_spanned(
                &name,
                format!("duplicate matrix parameter `{name}`"),
            ));
        }
        params.push(MatrixParam { name, values });

        if content.peek(Token![,]) {
            content.parse::<Token![,]>()?;
        }
    }

    if params.is_empty() {
        return Err(content.error("matrix cannot be empty\nhelp: give it at least one parameter, e.g. `matrix = [x: [1, 2]]`"));
    }
    Ok(params)
}

/// Parse a human duration like `"30s"`, `"500ms"` or `"2m"` into milliseconds.
/// A bare number is read as seconds.
pub fn parse_duration_ms(text: &str) -> std::result::Result<u64, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("timeout cannot be empty\nhelp: use `timeout = \"30s\"`".to_string());
    }

    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    if digits.is_empty() {
        return Err(format!("invalid timeout `{text}`: missing a number\nhelp: use `timeout = \"30s\"`"));
    }
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid number in timeout: `{digits}`"))?;

    let millis = match unit.trim().to_lowercase().as_str() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => amount.checked_mul(1000),
        "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => Some(amount),
        "m" | "min" | "mins" | "minute" | "minutes" => amount.checked_mul(60 * 1000),
        other => {
            return Err(format!("unknown timeout unit `{other}`\nhelp: valid units are s, ms and m"));
        }
    };
    let millis = millis.ok_or_else(|| "timeout overflows".to_string())?;
    if millis == 0 {
        return Err("timeout cannot be zero".to_string());
    }
    Ok(millis)
}

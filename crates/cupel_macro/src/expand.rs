//! Expansion of `#[cupel]` into forking `#[test]` functions.
//!
//! Every generated test has two personalities. The parent (the function
//! libtest calls) re-runs the test binary with `--exact <name>` and
//! `CUPEL_FORK=1`, then scrapes libtest's report from the child to decide
//! whether to relay a failure. The child (selected by the env var, or by
//! nextest's process-per-test mode) enters the sandbox and runs the actual
//! body. Panics, aborts and leaked global state therefore stay confined to
//! the child process.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Expr, ExprLit, ExprUnary, FnArg, Ident, ItemFn, Lit, Pat, UnOp};

use crate::args::{CupelArgs, IncludeSpec, MatrixParam, NamedCase};

pub fn expand(args: CupelArgs, func: ItemFn) -> syn::Result<TokenStream> {
    let vis = func.vis;
    let mut sig = func.sig;
    let is_async = sig.asyncness.take().is_some();
    let fn_name = sig.ident.clone();
    let block = func.block;

    let params = param_idents(&sig)?;
    if !params.is_empty() && args.cases.is_none() && args.matrix.is_none() {
        return Err(syn::Error::new_spanned(
            &sig,
            "function parameters require `cases` or `matrix`\nhelp: use `#[cupel(cases = [small: (1, 2)])]`",
        ));
    }

    let staging = staging_block(args.include.as_deref());
    let env_block = env_block(args.env.as_deref());
    let setup = match &args.setup {
        Some(expr) => quote! { #expr; },
        None => quote! {},
    };
    let teardown = match &args.teardown {
        Some(expr) => quote! { #expr; },
        None => quote! {},
    };
    let body = if is_async {
        quote! {
            async fn body() -> cupel::Result<()> {
                #block
                Ok(())
            }
            cupel::rt::block_on(body())??;
        }
    } else {
        quote! { #block }
    };

    let ignore_attr = if args.ignore { quote! { #[ignore] } } else { quote! {} };
    let should_panic_attr = if args.should_panic {
        quote! { #[should_panic] }
    } else {
        quote! {}
    };
    // A should_panic parent passes by panicking, so it keeps the unit return
    // type and unwraps the child's result instead of returning it.
    let ret_ty = if args.should_panic {
        quote! {}
    } else {
        quote! { -> cupel::Result<()> }
    };
    let child_call = if args.should_panic {
        quote! { child().unwrap() }
    } else {
        quote! { child() }
    };
    let final_ret = if args.should_panic { quote! {} } else { quote! { Ok(()) } };

    let attempts = args.retries.unwrap_or(1);
    let capture = capture_block(args.ignore, args.timeout_ms);

    let make_test = |test_ident: &Ident, bindings: TokenStream| {
        quote! {
            #[test]
            #should_panic_attr
            #ignore_attr
            #vis fn #test_ident() #ret_ty {
                #[allow(unreachable_code)]
                fn child() -> cupel::Result<()> {
                    #[allow(unused_imports)]
                    use cupel::{assert_eq, assert_ne, net::Ephemeral};
                    #bindings
                    #staging
                    #setup
                    #env_block
                    #body
                    #teardown
                    Ok(())
                }

                if std::env::var("NEXTEST_EXECUTION_MODE").is_ok_and(|mode| mode == "process-per-test") {
                    // nextest already runs one process per test; forking again
                    // would only hide the failure location.
                    return #child_call;
                }
                if matches!(std::env::var("CUPEL_FORK").as_deref(), Ok("1")) {
                    return #child_call;
                }

                let name = {
                    let mut parts: Vec<&str> = module_path!().split("::").skip(1).collect();
                    parts.push(stringify!(#test_ident));
                    parts.join("::")
                };
                let mut relayed: Option<String> = None;
                for _attempt in 0..#attempts {
                    #capture
                    let failed_line = format!("{name} ... FAILED");
                    let panicked_as_expected = format!("{name} - should panic ... ok");
                    if !(stdout.contains(&failed_line) || stdout.contains(&panicked_as_expected)) {
                        relayed = None;
                        break;
                    }
                    let header = format!("---- {name} stdout ----");
                    let detail = stdout
                        .lines()
                        .skip_while(|line| *line != header)
                        .skip(1)
                        .take_while(|line| !line.starts_with("----") && !line.starts_with("failures:"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    relayed = Some(detail);
                }
                if let Some(detail) = relayed {
                    cupel::relay::fail(detail);
                }
                #final_ret
            }
        }
    };

    if let Some(cases) = &args.cases {
        expand_cases(&fn_name, &params, cases, make_test)
    } else if let Some(matrix) = &args.matrix {
        expand_matrix(&fn_name, &params, matrix, make_test)
    } else {
        Ok(make_test(&fn_name, quote! {}))
    }
}

/// Collect the function's parameter names, rejecting patterns.
fn param_idents(sig: &syn::Signature) -> syn::Result<Vec<Ident>> {
    let mut params = Vec::new();
    for input in &sig.inputs {
        let FnArg::Typed(typed) = input else {
            return Err(syn::Error::new_spanned(input, "test functions cannot take `self`"));
        };
        let Pat::Ident(pat) = typed.pat.as_ref() else {
            return Err(syn::Error::new_spanned(
                &typed.pat,
                "test parameters must be plain identifiers",
            ));
        };
        params.push(pat.ident.clone());
    }
    Ok(params)
}

/// Sandbox entry plus any staged files. The guard binding keeps the scratch
/// directory (and the restored working directory) alive for the whole body.
fn staging_block(include: Option<&[IncludeSpec]>) -> TokenStream {
    match include {
        None | Some([]) => quote! { let _sandbox = cupel::Sandbox::new()?; },
        Some(files) => {
            let mut out = quote! { let sandbox = cupel::Sandbox::new()?; };
            for IncludeSpec { source, dest } in files {
                out.extend(match dest {
                    Some(dest) => quote! { sandbox.include_as(#source, #dest)?; },
                    None => quote! { sandbox.include(#source)?; },
                });
            }
            out
        }
    }
}

fn env_block(env: Option<&[(String, String)]>) -> TokenStream {
    let mut out = quote! {};
    for (key, value) in env.into_iter().flatten() {
        // The child owns its whole process, so mutating the environment is
        // confined to this one test.
        out.extend(quote! {
            unsafe { std::env::set_var(#key, #value) };
        });
    }
    out
}

/// Spawn the forked child and capture its libtest report into `stdout`.
fn capture_block(ignored: bool, timeout_ms: Option<u64>) -> TokenStream {
    let ignored_arg = if ignored { quote! { .arg("--ignored") } } else { quote! {} };
    match timeout_ms {
        None => quote! {
            let binary = std::env::args().next().expect("test binary path missing from argv");
            let output = std::process::Command::new(&binary)
                .arg(&name)
                .arg("--exact")
                #ignored_arg
                .env("CUPEL_FORK", "1")
                .output()
                .expect("failed to run the forked test process");
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        },
        Some(millis) => {
            let display = if millis >= 1000 && millis % 1000 == 0 {
                format!("{}s", millis / 1000)
            } else {
                format!("{millis}ms")
            };
            quote! {
                let binary = std::env::args().next().expect("test binary path missing from argv");
                let mut forked = std::process::Command::new(&binary)
                    .arg(&name)
                    .arg("--exact")
                    #ignored_arg
                    .env("CUPEL_FORK", "1")
                    .stdout(std::process::Stdio::piped())
                    .stderr(std::process::Stdio::piped())
                    .spawn()
                    .expect("failed to spawn the forked test process");
                let deadline = std::time::Instant::now() + std::time::Duration::from_millis(#millis);
                let output = loop {
                    if forked
                        .try_wait()
                        .expect("failed to poll the forked test process")
                        .is_some()
                    {
                        break forked
                            .wait_with_output()
                            .expect("failed to collect forked test output");
                    }
                    if std::time::Instant::now() >= deadline {
                        forked.kill().expect("failed to kill the timed out test process");
                        forked.wait().expect("failed to reap the timed out test process");
                        panic!("test timed out after {}", #display);
                    }
                    std::thread::sleep(std::time::Duration::from_millis(10));
                };
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            }
        }
    }
}

fn expand_cases(
    fn_name: &Ident,
    params: &[Ident],
    cases: &[NamedCase],
    make_test: impl Fn(&Ident, TokenStream) -> TokenStream,
) -> syn::Result<TokenStream> {
    let mut tests = TokenStream::new();
    for NamedCase { name, args } in cases {
        if args.elems.len() != params.len() {
            return Err(syn::Error::new_spanned(
                args,
                format!(
                    "case `{name}` has {} arguments but the function has {} parameters",
                    args.elems.len(),
                    params.len()
                ),
            ));
        }
        let test_ident = format_ident!("{}_{}", fn_name, name);
        let bindings = if params.is_empty() {
            quote! {}
        } else {
            quote! { let (#(#params,)*) = #args; }
        };
        tests.extend(make_test(&test_ident, bindings));
    }
    Ok(tests)
}

fn expand_matrix(
    fn_name: &Ident,
    params: &[Ident],
    matrix: &[MatrixParam],
    make_test: impl Fn(&Ident, TokenStream) -> TokenStream,
) -> syn::Result<TokenStream> {
    if matrix.len() != params.len() {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            format!(
                "matrix has {} parameters but the function has {}\nhelp: matrix parameters must mirror the function's parameters",
                matrix.len(),
                params.len()
            ),
        ));
    }
    for (param, axis) in params.iter().zip(matrix) {
        if *param != axis.name {
            return Err(syn::Error::new_spanned(
                &axis.name,
                format!(
                    "matrix parameter `{}` does not match function parameter `{param}`\nhelp: matrix parameters must appear in the function's order",
                    axis.name
                ),
            ));
        }
    }

    let axes: Vec<&[Expr]> = matrix.iter().map(|axis| axis.values.as_slice()).collect();
    let mut tests = TokenStream::new();
    for combo in cartesian(&axes) {
        let suffix = combo
            .iter()
            .enumerate()
            .map(|(index, value)| ident_fragment(value).unwrap_or_else(|| index.to_string()))
            .collect::<Vec<_>>()
            .join("_");
        let test_ident = format_ident!("{}_{}", fn_name, suffix);
        let values = combo.iter();
        let bindings = quote! { #(let #params = #values;)* };
        tests.extend(make_test(&test_ident, bindings));
    }
    Ok(tests)
}

/// Cartesian product of the matrix axes, in declaration order.
fn cartesian<'a, T>(axes: &[&'a [T]]) -> Vec<Vec<&'a T>> {
    let mut combos: Vec<Vec<&T>> = vec![vec![]];
    for axis in axes {
        let mut grown = Vec::with_capacity(combos.len() * axis.len());
        for combo in &combos {
            for value in *axis {
                let mut next = combo.clone();
                next.push(value);
                grown.push(next);
            }
        }
        combos = grown;
    }
    combos
}

/// Render a matrix value as a test-name fragment. `None` means the value is
/// too complex and the caller falls back to the axis index.
fn ident_fragment(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Lit(ExprLit { lit: Lit::Int(lit), .. }) => Some(lit.base10_digits().to_string()),
        Expr::Lit(ExprLit { lit: Lit::Bool(lit), .. }) => Some(lit.value.to_string()),
        Expr::Lit(ExprLit { lit: Lit::Str(lit), .. }) => {
            let sanitized: String = lit
                .value()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            match sanitized.chars().next() {
                None => None,
                Some(first) if first.is_ascii_digit() => Some(format!("_{sanitized}")),
                Some(_) => Some(sanitized),
            }
        }
        Expr::Unary(ExprUnary { op: UnOp::Neg(_), expr, .. }) => match expr.as_ref() {
            Expr::Lit(ExprLit { lit: Lit::Int(lit), .. }) => Some(format!("neg{}", lit.base10_digits())),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(text: &str) -> Expr {
        syn::parse_str(text).unwrap()
    }

    #[test]
    fn cartesian_orders_by_declaration() {
        let a = [1, 2];
        let b = [3, 4, 5];
        let combos = cartesian(&[&a[..], &b[..]]);
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0], vec![&1, &3]);
        assert_eq!(combos[5], vec![&2, &5]);
    }

    #[test]
    fn cartesian_of_nothing_is_one_empty_combo() {
        let combos = cartesian::<i32>(&[]);
        assert_eq!(combos, vec![Vec::<&i32>::new()]);
    }

    #[test]
    fn fragments_for_simple_literals() {
        assert_eq!(ident_fragment(&expr("42")).as_deref(), Some("42"));
        assert_eq!(ident_fragment(&expr("-5")).as_deref(), Some("neg5"));
        assert_eq!(ident_fragment(&expr("true")).as_deref(), Some("true"));
        assert_eq!(ident_fragment(&expr("\"foo-bar\"")).as_deref(), Some("foo_bar"));
        assert_eq!(ident_fragment(&expr("\"7up\"")).as_deref(), Some("_7up"));
    }

    #[test]
    fn complex_values_fall_back_to_index() {
        assert_eq!(ident_fragment(&expr("1 + 1")), None);
        assert_eq!(ident_fragment(&expr("Vec::new()")), None);
        assert_eq!(ident_fragment(&expr("\"--\"")), None);
    }

    #[test]
    fn single_test_expansion_forks_and_relays() {
        let func: ItemFn = syn::parse_str("fn works() { assert!(true); }").unwrap();
        let tokens = expand(CupelArgs::default(), func).unwrap().to_string();
        assert!(tokens.contains("CUPEL_FORK"));
        assert!(tokens.contains("-- exact") || tokens.contains("\"--exact\""));
        assert!(tokens.contains("relay"));
    }

    #[test]
    fn cases_expand_to_one_test_each() {
        let func: ItemFn = syn::parse_str("fn sums(a: i32, b: i32) { assert!(a + b > 0); }").unwrap();
        let args: CupelArgs = syn::parse_str("cases = [small: (1, 2), large: (10, 20)]").unwrap();
        let tokens = expand(args, func).unwrap().to_string();
        assert!(tokens.contains("sums_small"));
        assert!(tokens.contains("sums_large"));
    }

    #[test]
    fn case_arity_mismatch_is_rejected() {
        let func: ItemFn = syn::parse_str("fn sums(a: i32, b: i32) { let _ = a + b; }").unwrap();
        let args: CupelArgs = syn::parse_str("cases = [broken: (1,)]").unwrap();
        let err = expand(args, func).unwrap_err();
        assert!(err.to_string().contains("1 arguments but the function has 2"));
    }

    #[test]
    fn matrix_expands_the_full_product() {
        let func: ItemFn = syn::parse_str("fn grid(a: i32, b: i32) { let _ = a * b; }").unwrap();
        let args: CupelArgs = syn::parse_str("matrix = [a: [1, 2], b: [3, 4]]").unwrap();
        let tokens = expand(args, func).unwrap().to_string();
        for name in ["grid_1_3", "grid_1_4", "grid_2_3", "grid_2_4"] {
            assert!(tokens.contains(name), "missing {name}");
        }
    }

    #[test]
    fn matrix_parameter_mismatch_is_rejected() {
        let func: ItemFn = syn::parse_str("fn grid(a: i32, b: i32) { let _ = a * b; }").unwrap();
        let args: CupelArgs = syn::parse_str("matrix = [a: [1], c: [2]]").unwrap();
        let err = expand(args, func).unwrap_err();
        assert!(err.to_string().contains("does not match function parameter `b`"));
    }

    #[test]
    fn parameters_without_cases_or_matrix_are_rejected() {
        let func: ItemFn = syn::parse_str("fn sums(a: i32) { let _ = a; }").unwrap();
        let err = expand(CupelArgs::default(), func).unwrap_err();
        assert!(err.to_string().contains("require `cases` or `matrix`"));
    }

    #[test]
    fn ignored_tests_fork_with_the_ignored_flag() {
        let func: ItemFn = syn::parse_str("fn broken() { panic!() }").unwrap();
        let args: CupelArgs = syn::parse_str("ignore").unwrap();
        let tokens = expand(args, func).unwrap().to_string();
        assert!(tokens.contains("# [ignore]") || tokens.contains("#[ignore]"));
        assert!(tokens.contains("\"--ignored\""));
    }
}

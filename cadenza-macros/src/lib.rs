//! Entry-point attributes for the Cadenza runtime.
//!
//! Both attributes turn an `async fn` into a synchronous one that builds a
//! runtime and drives the original body as its main task with
//! `Runtime::block_on`. The body may return `()` or
//! `Result<T, cadenza::unwind::Unwinding>`.
//!
//! Accepted arguments:
//! - `seed = N` seeds the generator breaking ties between ready select cases.

use proc_macro::{Delimiter, TokenStream, TokenTree};

/// Pieces of the annotated function, rendered back to source text.
struct EntryPoint {
    /// Attributes and visibility in front of `fn`, with `async` removed.
    head: String,
    name: String,
    /// Everything between the argument list and the body, e.g. `-> Result<(), Unwinding>`.
    output: String,
    body: String,
}

fn parse_entry_point(item: TokenStream) -> Result<EntryPoint, String> {
    let tokens: Vec<TokenTree> = item.into_iter().collect();

    let fn_pos = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "fn"))
        .ok_or("expected a function")?;

    let head = tokens[..fn_pos]
        .iter()
        .filter(|t| !matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))
        .cloned()
        .collect::<TokenStream>()
        .to_string();

    let name = match tokens.get(fn_pos + 1) {
        Some(TokenTree::Ident(id)) => id.to_string(),
        _ => return Err("expected a function name".to_owned()),
    };

    match tokens.get(fn_pos + 2) {
        Some(TokenTree::Group(g)) if g.delimiter() == Delimiter::Parenthesis => {
            if !g.stream().is_empty() {
                return Err(format!("`{name}` must not take arguments"));
            }
        }
        _ => return Err("generic entry points are not supported".to_owned()),
    }

    let body_pos = tokens.len() - 1;
    let body = match &tokens[body_pos] {
        TokenTree::Group(g) if g.delimiter() == Delimiter::Brace => g.to_string(),
        _ => return Err("expected a function body".to_owned()),
    };

    // Collected as a stream so joint punctuation such as `->` survives.
    let output = tokens[fn_pos + 3..body_pos]
        .iter()
        .cloned()
        .collect::<TokenStream>()
        .to_string();

    Ok(EntryPoint {
        head,
        name,
        output,
        body,
    })
}

/// Builds the runtime constructor from the attribute arguments.
fn runtime_builder(attr: TokenStream) -> Result<String, String> {
    let mut builder = String::from("::cadenza::RuntimeBuilder::new()");

    let attr_str = attr.to_string();
    for part in attr_str.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            Some((key, value)) if key.trim() == "seed" => {
                let seed = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| format!("invalid seed `{}`", value.trim()))?;
                builder.push_str(&format!(".seed({seed})"));
            }
            _ => return Err(format!("unknown argument `{part}`")),
        }
    }

    builder.push_str(".build()");
    Ok(builder)
}

fn compile_error(msg: &str) -> TokenStream {
    format!("compile_error!({msg:?});")
        .parse()
        .unwrap_or_default()
}

fn expand(attr: TokenStream, item: TokenStream, drive: &str, is_test: bool) -> TokenStream {
    let entry = match parse_entry_point(item) {
        Ok(entry) => entry,
        Err(msg) => return compile_error(&msg),
    };

    let builder = match runtime_builder(attr) {
        Ok(builder) => builder,
        Err(msg) => return compile_error(&msg),
    };

    let EntryPoint {
        head,
        name,
        output,
        body,
    } = entry;

    let test_attr = if is_test { "#[test]" } else { "" };

    let expanded = format!(
        "{test_attr}
        {head} fn {name}() {{
            async fn __cadenza_entry() {output} {body}

            let runtime = {builder};
            let outcome = runtime.block_on(__cadenza_entry());
            {drive}
        }}"
    );

    expanded
        .parse()
        .unwrap_or_else(|err| compile_error(&format!("cadenza entry point error: {err}")))
}

/// Runs an `async fn main` on a Cadenza runtime.
///
/// A fatal runtime error (uncaught unwind in `main`, deadlock, ...) is
/// printed to stderr and the process exits with status 2.
///
/// ```rust,ignore
/// #[cadenza::main(seed = 7)]
/// async fn main() {
///     cadenza::task::spawn(async { println!("hello") });
/// }
/// ```
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(
        attr,
        item,
        "if let ::core::result::Result::Err(error) = outcome {
            ::std::eprintln!(\"fatal error: {error}\");
            ::std::process::exit(2);
        }",
        false,
    )
}

/// Runs an `async fn` test on a fresh Cadenza runtime.
///
/// The test fails if the runtime reports a fatal error.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(
        attr,
        item,
        "if let ::core::result::Result::Err(error) = outcome {
            ::core::panic!(\"runtime terminated abnormally: {error}\");
        }",
        true,
    )
}

use proc_macro2::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};

pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(args, item, false)
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(args, item, true)
}

/// Arguments accepted by both entry macros: at most `worker_threads = N`.
struct MacroArgs {
    worker_threads: Option<usize>,
}

impl Parse for MacroArgs {
    fn parse(input: ParseStream<'_>) -> syn::Result<Self> {
        let mut worker_threads = None;

        while !input.is_empty() {
            let name: syn::Ident = input.parse()?;
            input.parse::<syn::Token![=]>()?;

            if name != "worker_threads" {
                return Err(syn::Error::new(
                    name.span(),
                    format!("unknown attribute `{name}`, expected `worker_threads`"),
                ));
            }

            let value: syn::LitInt = input.parse()?;
            let threads: usize = value.base10_parse()?;
            if threads == 0 {
                return Err(syn::Error::new(value.span(), "`worker_threads` may not be 0"));
            }
            if worker_threads.replace(threads).is_some() {
                return Err(syn::Error::new(
                    name.span(),
                    "`worker_threads` set multiple times",
                ));
            }

            if !input.is_empty() {
                input.parse::<syn::Token![,]>()?;
            }
        }

        Ok(Self { worker_threads })
    }
}

/// Rewrite `async fn f() { .. }` into a sync `fn f()` that builds a runtime
/// and drives the original body as its root task.
fn expand(args: TokenStream, item: TokenStream, is_test: bool) -> TokenStream {
    let parsed_args = match syn::parse2::<MacroArgs>(args) {
        Ok(parsed) => parsed,
        Err(error) => return with_error(item, error),
    };
    let mut func = match syn::parse2::<syn::ItemFn>(item.clone()) {
        Ok(func) => func,
        Err(error) => return with_error(item, error),
    };
    if let Err(error) = validate(&func, is_test) {
        return with_error(item, error);
    }

    func.sig.asyncness = None;

    let mut builder = quote! { spindle::runtime::Builder::new() };
    if let Some(threads) = parsed_args.worker_threads {
        builder = quote! { #builder.worker_threads(#threads) };
    }

    let test_attr = is_test.then(|| quote! { #[::core::prelude::v1::test] });
    let attrs = &func.attrs;
    let vis = &func.vis;
    let sig = &func.sig;
    let body = &func.block;

    quote! {
        #(#attrs)*
        #test_attr
        #vis #sig {
            let body = async #body;
            #builder
                .try_build()
                .expect("failed building the runtime")
                .block_on(body)
        }
    }
}

fn validate(func: &syn::ItemFn, is_test: bool) -> Result<(), syn::Error> {
    if func.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            func.sig.fn_token,
            "the `async` keyword is missing from the function declaration",
        ));
    }

    if !is_test && func.sig.ident == "main" && !func.sig.inputs.is_empty() {
        return Err(syn::Error::new_spanned(
            &func.sig.ident,
            "the main function cannot accept arguments",
        ));
    }

    if is_test {
        if let Some(attr) = func.attrs.iter().find(|attr| is_test_attribute(attr)) {
            return Err(syn::Error::new_spanned(
                attr,
                "a test attribute is already present; remove it or reorder the attributes",
            ));
        }
    }

    Ok(())
}

/// Matches `#[test]` and path-qualified forms such as
/// `#[core::prelude::v1::test]`, all of which would collide with the
/// `#[test]` this macro generates.
fn is_test_attribute(attr: &syn::Attribute) -> bool {
    let syn::Meta::Path(path) = &attr.meta else {
        return false;
    };
    path.segments
        .last()
        .is_some_and(|segment| segment.arguments.is_none() && segment.ident == "test")
}

/// Emit the original item alongside the error so IDE completions keep
/// working on the unexpanded function.
fn with_error(item: TokenStream, error: syn::Error) -> TokenStream {
    let mut tokens = item;
    tokens.extend(error.into_compile_error());
    tokens
}

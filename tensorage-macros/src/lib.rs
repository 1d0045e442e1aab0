use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Async test running on a tokio runtime with `tracing` output captured per test.
///
/// Logs are filtered at `warn` unless `RUST_LOG` says otherwise.
#[proc_macro_attribute]
pub fn tokio_test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let test_fn = parse_macro_input!(item as ItemFn);
    with_test_log(quote! { #[test_log::test(tokio::test)] }, test_fn)
}

/// Synchronous counterpart of [`macro@tokio_test`].
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let test_fn = parse_macro_input!(item as ItemFn);
    with_test_log(quote! { #[test_log::test] }, test_fn)
}

fn with_test_log(runner: proc_macro2::TokenStream, test_fn: ItemFn) -> TokenStream {
    let ItemFn { attrs, vis, sig, block } = test_fn;
    let expanded = quote! {
        #runner
        #[test_log(default_log_filter = "warn")]
        #(#attrs)*
        #vis #sig #block
    };
    TokenStream::from(expanded)
}

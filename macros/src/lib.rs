//! Procedural macros for testing ba-reorder.
//!
//! This crate provides the `#[ba_test]` attribute used by every unit and
//! integration test in the workspace.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, ItemFn, Path, Token};

/// Mark a function as a ba-reorder test.
///
/// Every test gets `env_logger` initialized in test mode, so `RUST_LOG=debug`
/// shows the per-frame reorder decisions of a failing test.
///
/// - A plain `fn` becomes an ordinary `#[test]`.
/// - An `async fn` runs on a current-thread tokio runtime whose clock starts
///   paused, so aging timers fire as soon as the runtime is idle instead of
///   after real wall-clock time.
///
/// # Attributes
///
/// - `#[ba_test]` - Regular test
/// - `#[ba_test(real_time)]` - Async test with a running (unpaused) clock
/// - `#[ba_test(should_panic)]` - Test that should panic
///
/// # Example
///
/// ```ignore
/// use ba_reorder_macros::ba_test;
///
/// #[ba_test]
/// fn wraps_at_4096() {
///     assert_eq!(SeqNum::new(4095).next(), SeqNum::new(0));
/// }
///
/// #[ba_test]
/// async fn aging_flushes_hole() {
///     tokio::time::sleep(Duration::from_millis(150)).await;
/// }
/// ```
#[proc_macro_attribute]
pub fn ba_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);

    let options = match parse_options(attr.into()) {
        Ok(options) => options,
        Err(e) => return e.to_compile_error().into(),
    };

    if options.real_time && input_fn.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &input_fn.sig.ident,
            "ba_test: real_time only applies to async tests",
        )
        .to_compile_error()
        .into();
    }

    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;
    let fn_output = &input_fn.sig.output;

    let should_panic = if options.should_panic {
        quote! { #[should_panic] }
    } else {
        quote! {}
    };

    let init_logging = quote! {
        let _ = ::env_logger::builder().is_test(true).try_init();
    };

    let body = if input_fn.sig.asyncness.is_some() {
        let runtime = if options.real_time {
            quote! {
                ::tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
            }
        } else {
            quote! {
                ::tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .start_paused(true)
                    .build()
            }
        };
        quote! {
            #init_logging
            #runtime
                .expect("failed to build test runtime")
                .block_on(async move #fn_block)
        }
    } else {
        quote! {
            #init_logging
            #fn_block
        }
    };

    let expanded = quote! {
        #[test]
        #should_panic
        #(#fn_attrs)*
        #fn_vis fn #fn_name() #fn_output {
            #body
        }
    };

    TokenStream::from(expanded)
}

#[derive(Default)]
struct TestOptions {
    real_time: bool,
    should_panic: bool,
}

fn parse_options(attr: TokenStream2) -> syn::Result<TestOptions> {
    let mut options = TestOptions::default();
    if attr.is_empty() {
        return Ok(options);
    }

    let paths = Punctuated::<Path, Token![,]>::parse_terminated.parse2(attr)?;
    for path in paths {
        if path.is_ident("real_time") {
            options.real_time = true;
        } else if path.is_ident("should_panic") {
            options.should_panic = true;
        } else {
            return Err(syn::Error::new_spanned(
                path,
                "ba_test: unknown attribute. Supported: real_time, should_panic",
            ));
        }
    }
    Ok(options)
}

#![allow(clippy::needless_doctest_main)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]

//! Entry-point attribute macros for the spindle runtime.

mod entry;

/// Marks an async function to be executed by a spindle runtime. This macro
/// sets up a `Runtime` without requiring the user to touch `Runtime` or
/// `Builder` directly.
///
/// The function runs as the runtime's root task on the calling thread;
/// spawn further tasks from inside it.
///
/// # Usage
///
/// ```no_run
/// #[spindle::main]
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
///
/// Equivalent code not using `#[spindle::main]`:
///
/// ```no_run
/// fn main() {
///     spindle::runtime::Builder::new()
///         .try_build()
///         .unwrap()
///         .block_on(async {
///             println!("Hello world");
///         })
/// }
/// ```
///
/// ## Set the number of blocking-pool threads
///
/// ```no_run
/// #[spindle::main(worker_threads = 2)]
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
///
/// # Function arguments
///
/// Function arguments are NOT allowed.
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Marks an async function to be executed by a runtime, suitable for the
/// test environment. Each test gets its own fresh runtime.
///
/// # Usage
///
/// ```no_run
/// #[spindle::test]
/// async fn my_test() {
///     assert!(true);
/// }
/// ```
///
/// Equivalent code not using `#[spindle::test]`:
///
/// ```no_run
/// #[test]
/// fn my_test() {
///     spindle::runtime::Builder::new()
///         .try_build()
///         .unwrap()
///         .block_on(async {
///             assert!(true);
///         })
/// }
/// ```
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}

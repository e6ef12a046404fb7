//! Attribute macros for `agent-relay`.
//!
//! `#[tool_args]` prepares a struct to be the typed arguments of a tool;
//! `#[structured_output]` prepares a struct or enum to be an agent's output
//! type. Both only add derives, so the annotated item keeps any other
//! attributes (serde renames, doc comments) it already carries.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, Item};

fn with_derives(item: Item, derives: TokenStream2, allow_enum: bool) -> TokenStream2 {
    match &item {
        Item::Struct(_) => {}
        Item::Enum(_) if allow_enum => {}
        other => {
            let what = if allow_enum { "a struct or an enum" } else { "a struct" };
            return syn::Error::new(other.span(), format!("expected {what}")).to_compile_error();
        }
    }

    quote! {
        #[derive(#derives)]
        #item
    }
}

/// Derives `Deserialize` and `JsonSchema` for a tool's argument struct.
#[proc_macro_attribute]
pub fn tool_args(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as Item);
    with_derives(
        item,
        quote!(::serde::Deserialize, ::schemars::JsonSchema),
        false,
    )
    .into()
}

/// Derives `Serialize`, `Deserialize` and `JsonSchema` for an agent's output type.
#[proc_macro_attribute]
pub fn structured_output(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as Item);
    with_derives(
        item,
        quote!(::serde::Serialize, ::serde::Deserialize, ::schemars::JsonSchema),
        true,
    )
    .into()
}

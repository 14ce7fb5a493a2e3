use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, LitInt};

#[proc_macro_attribute]
/// Attaches an ADC register address to a `packed_struct` register definition.
///
/// Expands to an implementation of the `Address` trait, which must be in scope at the use site.
/// Place it above the `#[derive]` so the item reaches the derives untouched.
pub fn address(attr: TokenStream, item: TokenStream) -> TokenStream {
    let addr = parse_macro_input!(attr as LitInt);
    // Registers live in an 8 bit address space
    if let Err(e) = addr.base10_parse::<u8>() {
        return syn::Error::new(addr.span(), format!("register address must fit in a u8: {e}"))
            .to_compile_error()
            .into();
    }
    let item = parse_macro_input!(item as DeriveInput);
    let ident = &item.ident;

    let generated = quote! {
        #item

        impl Address for #ident {
            const ADDR: u8 = #addr;
        }
    };
    TokenStream::from(generated)
}

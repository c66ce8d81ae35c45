// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Procedural macro turning an async trait into a `silo` service contract.
//!
//! ```text
//! #[service_contract]
//! pub trait Hello {
//!     async fn say(&self, name: String, greeting: String) -> Result<String, CallErr>;
//!
//!     #[one_way]
//!     async fn ping(&self) -> Result<(), CallErr>;
//!
//!     #[timeout_ms(500)]
//!     async fn slow(&self, delay_ms: u64) -> Result<u64, CallErr>;
//! }
//! ```
//!
//! generates, next to the trait:
//!
//! 1. `HelloContract`, implementing `silo::ServiceContract`. It builds the
//!    interface descriptor (interface id, method ids, invocation options) and
//!    wraps routing targets into references. `HelloContract::invoker(Arc<T>)`
//!    serves an implementation of `Hello`.
//! 2. `HelloReference`, the typed proxy. Each method encodes its arguments in
//!    declared order, tags the request with the method's id and forwards it to
//!    a `silo::ReferenceTarget`.
//! 3. `HelloInvoker<T>`, the server side. It maps method ids onto the methods
//!    of `T` through the descriptor's id index and a `match`.
//!
//! Requirements the macro checks:
//!
//! 1. Every item is an `async fn` taking `&self`, without generics.
//! 2. Every argument is an owned type implementing `silo::BytesConvertable`.
//! 3. Every method returns `Result<T, E>` where `T: BytesConvertable` and
//!    `E: From<silo::CallErr> + Display`.
//! 4. `#[one_way]` methods return `Result<(), E>`.
//!
//! The `#[service_contract]` attribute goes *above* `#[async_trait]`. When the
//! trait carries no `async_trait` attribute, `#[::silo::async_trait]` is added.
//! An explicit interface name can be given with
//! `#[service_contract(name = "my.Interface")]`; by default the name is the
//! trait's module path.

extern crate proc_macro;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::format_ident;
use quote::quote;
use quote::ToTokens;
use syn::spanned::Spanned;
use syn::FnArg;
use syn::GenericArgument;
use syn::Ident;
use syn::ItemTrait;
use syn::LitInt;
use syn::LitStr;
use syn::Pat;
use syn::PathArguments;
use syn::ReturnType;
use syn::TraitItem;
use syn::TraitItemFn;
use syn::Type;

/// Generate the contract, reference and invoker of an async service trait.
///
/// Method attributes:
/// * `#[one_way]`: fire-and-forget, the success type must be `()`
/// * `#[timeout_ms(n)]`: override the silo's request timeout for this method
#[proc_macro_attribute]
pub fn service_contract(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut name: Option<LitStr> = None;
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("name") {
            name = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error(
                "unsupported service_contract property.\n\
                 \n\
                 The only supported property is the interface name:\n  \
                 #[service_contract(name = \"my.Interface\")]",
            ))
        }
    });
    if let Err(err) = syn::parse::Parser::parse(parser, args) {
        return err.to_compile_error().into();
    }

    let item: ItemTrait = match syn::parse(input) {
        Ok(item) => item,
        Err(err) => return err.to_compile_error().into(),
    };

    match impl_service_contract(name, item) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// One parsed contract method
struct ContractMethod {
    ident: Ident,
    args: Vec<(Ident, Type)>,
    output: ReturnType,
    ok_ty: Type,
    err_ty: Type,
    returns_unit: bool,
    one_way: bool,
    timeout_ms: Option<LitInt>,
}

fn impl_service_contract(name: Option<LitStr>, mut item: ItemTrait) -> syn::Result<TokenStream2> {
    if !item.generics.params.is_empty() || item.generics.where_clause.is_some() {
        return Err(syn::Error::new(
            item.generics.span(),
            "Generic service contracts are not supported, the interface id could not be stable across instantiations",
        ));
    }

    let mut methods = Vec::new();
    for trait_item in item.items.iter_mut() {
        match trait_item {
            TraitItem::Fn(method) => methods.push(parse_method(method)?),
            other => {
                return Err(syn::Error::new(
                    other.span(),
                    "Service contracts may only contain `async fn` methods",
                ))
            }
        }
    }

    let has_async_trait = item.attrs.iter().any(|attr| {
        attr.path()
            .segments
            .last()
            .map_or(false, |segment| segment.ident == "async_trait")
    });
    if !has_async_trait {
        item.attrs.push(syn::parse_quote!(#[::silo::async_trait]));
    }

    let vis = &item.vis;
    let trait_ident = &item.ident;
    let contract = format_ident!("{}Contract", trait_ident);
    let reference = format_ident!("{}Reference", trait_ident);
    let invoker = format_ident!("{}Invoker", trait_ident);

    let trait_name = trait_ident.to_string();
    let interface_name = match name {
        Some(name) => quote! { ::std::string::String::from(#name) },
        None => quote! { ::std::format!("{}::{}", ::core::module_path!(), #trait_name) },
    };

    let specs = methods.iter().map(impl_method_spec);
    let reference_methods = methods
        .iter()
        .enumerate()
        .map(|(index, method)| impl_reference_method(&contract, index, method));
    let invoker_arms = methods
        .iter()
        .enumerate()
        .map(|(index, method)| impl_invoker_arm(trait_ident, index, method));

    let contract_doc = format!("Service contract of [{trait_name}]");
    let reference_doc = format!(
        "Typed reference implementing [{trait_name}] by routing calls through the silo runtime"
    );

    Ok(quote! {
        #item

        #[doc = #contract_doc]
        #[derive(Debug, Clone, Copy, Default)]
        #vis struct #contract;

        impl ::silo::ServiceContract for #contract {
            type Reference = #reference;

            fn interface_name() -> ::std::string::String {
                #interface_name
            }

            fn build_descriptor() -> ::core::result::Result<::silo::ServiceDescriptor, ::silo::ContractErr> {
                ::silo::ServiceDescriptor::builder(<Self as ::silo::ServiceContract>::interface_name())
                    #(#specs)*
                    .build()
            }

            fn reference(target: ::std::sync::Arc<dyn ::silo::ReferenceTarget>) -> Self::Reference {
                #reference { target }
            }
        }

        impl #contract {
            /// Serve an implementation through this contract
            pub fn invoker<T>(
                service: ::std::sync::Arc<T>,
            ) -> ::core::result::Result<::std::sync::Arc<dyn ::silo::MethodInvoker>, ::silo::ContractErr>
            where
                T: #trait_ident + ::silo::Addressable,
            {
                let descriptor = <Self as ::silo::ServiceContract>::descriptor()?;
                ::core::result::Result::Ok(::std::sync::Arc::new(#invoker { service, descriptor }))
            }
        }

        #[doc = #reference_doc]
        #[derive(Clone)]
        #vis struct #reference {
            target: ::std::sync::Arc<dyn ::silo::ReferenceTarget>,
        }

        impl #reference {
            /// The identity this reference calls
            pub fn identity(&self) -> ::silo::Identity {
                self.target.identity()
            }
        }

        impl ::core::fmt::Debug for #reference {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                ::core::write!(f, "{}({})", #trait_name, self.target.identity())
            }
        }

        impl ::silo::Addressable for #reference {}

        #[::silo::async_trait]
        impl #trait_ident for #reference {
            #(#reference_methods)*
        }

        #[doc(hidden)]
        #vis struct #invoker<T> {
            service: ::std::sync::Arc<T>,
            descriptor: ::std::sync::Arc<::silo::ServiceDescriptor>,
        }

        #[::silo::async_trait]
        impl<T> ::silo::MethodInvoker for #invoker<T>
        where
            T: #trait_ident + ::silo::Addressable,
        {
            fn descriptor(&self) -> ::std::sync::Arc<::silo::ServiceDescriptor> {
                self.descriptor.clone()
            }

            async fn invoke(
                &self,
                request: ::silo::InvokeRequest,
            ) -> ::core::result::Result<::core::option::Option<::std::vec::Vec<u8>>, ::silo::RemoteException> {
                let ::silo::InvokeRequest { interface_id, method_id, arguments, .. } = request;
                let index = if interface_id == self.descriptor.interface_id() {
                    self.descriptor.method_index(method_id)
                } else {
                    ::core::option::Option::None
                };
                let index = index.ok_or_else(|| ::silo::invoker::unknown_method(&self.descriptor, method_id))?;
                #[allow(unused_mut)]
                let mut __silo_arguments = ::silo::invoker::Arguments::new(&self.descriptor, index, arguments)?;
                match index {
                    #(#invoker_arms)*
                    _ => ::core::result::Result::Err(::silo::invoker::unknown_method(&self.descriptor, method_id)),
                }
            }

            async fn on_activate(&self) -> ::core::result::Result<(), ::silo::SiloProcessingErr> {
                ::silo::Addressable::on_activate(&*self.service).await
            }

            async fn on_deactivate(&self) -> ::core::result::Result<(), ::silo::SiloProcessingErr> {
                ::silo::Addressable::on_deactivate(&*self.service).await
            }

            fn metadata(&self) -> ::std::vec::Vec<u8> {
                ::silo::Addressable::metadata(&*self.service)
            }
        }
    })
}

fn parse_method(method: &mut TraitItemFn) -> syn::Result<ContractMethod> {
    let mut one_way = false;
    let mut timeout_ms = None;
    let mut kept = Vec::with_capacity(method.attrs.len());
    for attr in method.attrs.drain(..) {
        if attr.path().is_ident("one_way") {
            attr.meta.require_path_only()?;
            one_way = true;
        } else if attr.path().is_ident("timeout_ms") {
            let lit: LitInt = attr.parse_args()?;
            lit.base10_parse::<u64>()?;
            timeout_ms = Some(lit);
        } else {
            kept.push(attr);
        }
    }
    method.attrs = kept;

    let sig = &method.sig;
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(
            sig.fn_token.span(),
            "Service contract methods must be `async fn`.\n\
             \n\
             If the trait is also annotated with `#[async_trait]`, place `#[service_contract]` above it:\n  \
             #[service_contract]\n  #[async_trait]\n  pub trait MyService { .. }",
        ));
    }
    if !sig.generics.params.is_empty() || sig.generics.where_clause.is_some() {
        return Err(syn::Error::new(
            sig.generics.span(),
            "Generic methods are not supported in service contracts, the remote side cannot instantiate them",
        ));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(syn::Error::new(
                sig.inputs.span(),
                "Service contract methods must take `&self` as their first argument",
            ))
        }
    }

    let mut args = Vec::new();
    for (position, input) in inputs.enumerate() {
        match input {
            FnArg::Typed(pat_ty) => {
                if let Type::Reference(reference) = &*pat_ty.ty {
                    return Err(syn::Error::new(
                        reference.span(),
                        "Service contract arguments must be owned types implementing `silo::BytesConvertable`",
                    ));
                }
                let ident = match &*pat_ty.pat {
                    Pat::Ident(pat) => pat.ident.clone(),
                    _ => format_ident!("arg{}", position),
                };
                args.push((ident, (*pat_ty.ty).clone()));
            }
            FnArg::Receiver(receiver) => {
                return Err(syn::Error::new(receiver.span(), "Unexpected receiver"))
            }
        }
    }

    let (ok_ty, err_ty) = match &sig.output {
        ReturnType::Type(_, ty) => result_types(ty)?,
        ReturnType::Default => {
            return Err(syn::Error::new(
                sig.ident.span(),
                "Service contract methods must return `Result<T, E>` where `E: From<silo::CallErr>`",
            ))
        }
    };
    let returns_unit = matches!(&ok_ty, Type::Tuple(tuple) if tuple.elems.is_empty());
    if one_way && !returns_unit {
        return Err(syn::Error::new(
            ok_ty.span(),
            "One-way methods cannot return a value, their success type must be `()`.\n\
             \n\
             Either remove `#[one_way]` or change the return type to:\n  \
             Result<(), YourError>",
        ));
    }

    Ok(ContractMethod {
        ident: sig.ident.clone(),
        args,
        output: sig.output.clone(),
        ok_ty,
        err_ty,
        returns_unit,
        one_way,
        timeout_ms,
    })
}

/// Split `Result<T, E>` into `(T, E)`
fn result_types(ty: &Type) -> syn::Result<(Type, Type)> {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Result" {
                if let PathArguments::AngleBracketed(generics) = &segment.arguments {
                    let types = generics
                        .args
                        .iter()
                        .filter_map(|arg| match arg {
                            GenericArgument::Type(ty) => Some(ty.clone()),
                            _ => None,
                        })
                        .collect::<Vec<_>>();
                    if let [ok, err] = types.as_slice() {
                        return Ok((ok.clone(), err.clone()));
                    }
                }
            }
        }
    }
    Err(syn::Error::new(
        ty.span(),
        "Service contract methods must return `Result<T, E>` with both types spelled out.\n\
         \n\
         Example:\n  async fn say(&self, name: String) -> Result<String, silo::CallErr>;",
    ))
}

/// Whitespace-free token text of a type, as used by the method id scheme
fn type_name(ty: &Type) -> String {
    ty.to_token_stream()
        .to_string()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn impl_method_spec(method: &ContractMethod) -> impl ToTokens {
    let name = method.ident.to_string();
    let params = method.args.iter().map(|(_, ty)| type_name(ty));
    let returns_unit = method.returns_unit;
    let one_way = method.one_way.then(|| quote! { .one_way() });
    let timeout = method.timeout_ms.as_ref().map(|ms| {
        quote! { .timeout(::silo::concurrency::Duration::from_millis(#ms)) }
    });
    quote! {
        .method(
            ::silo::contract::MethodSpec::new(#name)
                .params(&[#(#params),*])
                .returns_unit(#returns_unit)
                #one_way
                #timeout
        )
    }
}

fn impl_reference_method(contract: &Ident, index: usize, method: &ContractMethod) -> impl ToTokens {
    let ident = &method.ident;
    let output = &method.output;
    let ok_ty = &method.ok_ty;
    let err_ty = &method.err_ty;
    let arg_idents = method.args.iter().map(|(ident, _)| ident).collect::<Vec<_>>();
    let arg_tys = method.args.iter().map(|(_, ty)| ty);
    quote! {
        async fn #ident(&self, #(#arg_idents: #arg_tys),*) #output {
            let __silo_arguments: ::std::vec::Vec<::std::vec::Vec<u8>> =
                ::std::vec![#(::silo::BytesConvertable::into_bytes(#arg_idents)),*];
            let to_err = |err: ::silo::CallErr| <#err_ty as ::core::convert::From<::silo::CallErr>>::from(err);
            let descriptor = <#contract as ::silo::ServiceContract>::descriptor()
                .map_err(|err| to_err(::silo::CallErr::from(err)))?;
            let method = descriptor.method_at(#index).ok_or_else(|| {
                to_err(::silo::CallErr::Protocol(::std::format!(
                    "{} has no method at position {}",
                    descriptor.name(),
                    #index
                )))
            })?;
            let request = method.request(descriptor.interface_id(), __silo_arguments);
            let options = method.options().clone();
            let value = ::silo::ReferenceTarget::invoke(&*self.target, request, options)
                .await
                .map_err(to_err)?;
            ::silo::reference::decode_return::<#ok_ty>(value).map_err(to_err)
        }
    }
}

fn impl_invoker_arm(trait_ident: &Ident, index: usize, method: &ContractMethod) -> impl ToTokens {
    let ident = &method.ident;
    let arg_idents = method.args.iter().map(|(ident, _)| ident).collect::<Vec<_>>();
    let arg_tys = method.args.iter().map(|(_, ty)| ty);
    let on_success = if method.returns_unit {
        quote! {
            {
                let () = value;
                ::core::result::Result::Ok(::core::option::Option::None)
            }
        }
    } else {
        quote! {
            ::core::result::Result::Ok(::core::option::Option::Some(
                ::silo::BytesConvertable::into_bytes(value),
            ))
        }
    };
    quote! {
        #index => {
            #(let #arg_idents: #arg_tys = __silo_arguments.next()?;)*
            match <T as #trait_ident>::#ident(&*self.service, #(#arg_idents),*).await {
                ::core::result::Result::Ok(value) => #on_success,
                ::core::result::Result::Err(err) => {
                    ::core::result::Result::Err(::silo::invoker::application_error(&err))
                }
            }
        }
    }
}

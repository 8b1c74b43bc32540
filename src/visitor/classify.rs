//! Binding kind to entry kind.

use crate::ast::{Binding, CompositeKey, NameProperty, NameRole};
use crate::types::{EntryType, LimitTo};

/// Entry kind for a directly indexable binding.
///
/// Returns `None` for bindings that are not indexed as themselves:
/// using-declarations (fanned out by the visitor), problem bindings, and
/// compiler-generated methods.
pub fn entry_type(binding: &Binding, property: NameProperty) -> Option<EntryType> {
    let kind = match binding {
        Binding::Composite(composite) => {
            let forward = property == NameProperty::ElaboratedTypeSpecifier;
            match (composite.key, forward) {
                (CompositeKey::Class, false) => EntryType::Class,
                (CompositeKey::Class, true) => EntryType::FwdClass,
                (CompositeKey::Struct, false) => EntryType::Struct,
                (CompositeKey::Struct, true) => EntryType::FwdStruct,
                (CompositeKey::Union, false) => EntryType::Union,
                (CompositeKey::Union, true) => EntryType::FwdUnion,
            }
        }
        Binding::Enumeration(_) => EntryType::Enum,
        Binding::Enumerator(_) => EntryType::Enumerator,
        Binding::Typedef(_) => EntryType::Typedef,
        Binding::Namespace(_) => EntryType::Namespace,
        Binding::Field(_) => EntryType::Field,
        Binding::Variable(_) | Binding::Parameter(_) => EntryType::Var,
        Binding::Method(method) if method.is_implicit => return None,
        Binding::Method(_) => EntryType::Method,
        Binding::Function(_) => EntryType::Function,
        Binding::UsingDeclaration(_) | Binding::Problem(_) => return None,
    };
    Some(kind)
}

pub fn limit_to(role: NameRole) -> LimitTo {
    match role {
        NameRole::Declaration => LimitTo::Declaration,
        NameRole::Reference => LimitTo::Reference,
        NameRole::Unknown => LimitTo::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BindingName, CompositeBinding, MethodBinding, UsingBinding};
    use crate::types::QualifiedName;

    fn composite(key: CompositeKey) -> Binding {
        Binding::Composite(CompositeBinding::new(
            BindingName::qualified(QualifiedName::parse("ns::Shape")),
            key,
        ))
    }

    #[test]
    fn test_composites_split_on_position() {
        let class = composite(CompositeKey::Class);
        assert_eq!(entry_type(&class, NameProperty::CompositeTypeSpecifier), Some(EntryType::Class));
        assert_eq!(entry_type(&class, NameProperty::ElaboratedTypeSpecifier), Some(EntryType::FwdClass));
        assert_eq!(entry_type(&class, NameProperty::TypeName), Some(EntryType::Class));

        let strukt = composite(CompositeKey::Struct);
        assert_eq!(entry_type(&strukt, NameProperty::ElaboratedTypeSpecifier), Some(EntryType::FwdStruct));

        let union = composite(CompositeKey::Union);
        assert_eq!(entry_type(&union, NameProperty::CompositeTypeSpecifier), Some(EntryType::Union));
        assert_eq!(entry_type(&union, NameProperty::ElaboratedTypeSpecifier), Some(EntryType::FwdUnion));
    }

    #[test]
    fn test_fixed_kinds() {
        let name = || BindingName::new("x");
        let cases = [
            (Binding::Enumeration(name()), EntryType::Enum),
            (Binding::Enumerator(name()), EntryType::Enumerator),
            (Binding::Typedef(name()), EntryType::Typedef),
            (Binding::Namespace(name()), EntryType::Namespace),
            (Binding::Field(name()), EntryType::Field),
            (Binding::Variable(name()), EntryType::Var),
            (Binding::Parameter(name()), EntryType::Var),
            (Binding::Function(name()), EntryType::Function),
        ];
        for (binding, expected) in cases {
            assert_eq!(entry_type(&binding, NameProperty::Declarator), Some(expected));
        }
    }

    #[test]
    fn test_not_indexed_directly() {
        let implicit = Binding::Method(MethodBinding {
            name: BindingName::new("A"),
            is_virtual: false,
            is_destructor: false,
            is_implicit: true,
        });
        assert_eq!(entry_type(&implicit, NameProperty::Other), None);

        let using = Binding::UsingDeclaration(UsingBinding {
            name: BindingName::new("f"),
            delegates: vec![],
        });
        assert_eq!(entry_type(&using, NameProperty::UsingDeclaration), None);
    }

    #[test]
    fn test_limit_to_follows_role() {
        assert_eq!(limit_to(NameRole::Declaration), LimitTo::Declaration);
        assert_eq!(limit_to(NameRole::Reference), LimitTo::Reference);
        assert_eq!(limit_to(NameRole::Unknown), LimitTo::Unknown);
    }
}

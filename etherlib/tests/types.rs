use std::rc::Rc;

use etherlib::types::{NamedType, Type};

fn named(name: &str, parent: Option<Type>) -> Type {
    Type::Named(Rc::new(NamedType::new(name, parent)))
}

#[test]
fn any_is_the_top_of_every_chain() {
    let shape = named("Shape", Some(Type::Any));
    let circle = named("Circle", Some(shape.clone()));
    for t in [
        Type::Int,
        Type::String,
        Type::array_of(Type::Int),
        Type::func(Type::Int, vec![]),
        circle.clone(),
    ] {
        assert!(t.is_subtype_of(&Type::Any), "{t}");
        assert!(Type::Any.is_supertype_of(&t), "{t}");
    }
    assert!(circle.is_subtype_of(&shape));
    assert!(!shape.is_subtype_of(&circle));
}

#[test]
fn none_is_only_compatible_with_itself() {
    assert!(Type::None.is_subtype_of(&Type::None));
    assert!(!Type::None.is_subtype_of(&Type::Any));
    assert!(!Type::Int.is_subtype_of(&Type::None));
}

#[test]
fn named_types_compare_by_identity() {
    let a = named("Point", None);
    let b = named("Point", None);
    assert_ne!(a, b);
    assert_eq!(a, a.clone());
    assert_eq!(Type::array_of(Type::Int), Type::array_of(Type::Int));
}

#[test]
fn function_types_are_covariant_in_return_and_contravariant_in_params() {
    let shape = named("Shape", Some(Type::Any));
    let circle = named("Circle", Some(shape.clone()));
    let takes_shape_gives_circle = Type::func(circle.clone(), vec![shape.clone()]);
    let takes_circle_gives_shape = Type::func(shape.clone(), vec![circle.clone()]);
    assert!(takes_shape_gives_circle.is_subtype_of(&takes_circle_gives_shape));
    assert!(!takes_circle_gives_shape.is_subtype_of(&takes_shape_gives_circle));

    let two = Type::func(Type::None, vec![Type::Int, Type::Int]);
    let one = Type::func(Type::None, vec![Type::Int]);
    assert!(!two.is_subtype_of(&one));
    assert!(one.is_subtype_of(&Type::Function));
}

#[test]
fn null_fits_references_only() {
    assert!(Type::Null.is_subtype_of(&Type::String));
    assert!(Type::Null.is_subtype_of(&Type::array_of(Type::Int)));
    assert!(!Type::Null.is_subtype_of(&Type::Int));
    assert!(!Type::Null.is_subtype_of(&Type::Bool));
}

#[test]
fn numeric_ladder_widens_upwards() {
    assert!(Type::Byte.widens_to(&Type::Int));
    assert!(Type::Char.widens_to(&Type::Long));
    assert!(Type::Int.widens_to(&Type::Double));
    assert!(!Type::Long.widens_to(&Type::Int));
    assert!(!Type::Double.widens_to(&Type::Float));
}

#[test]
fn binary_promotion_prefers_the_wider_operand() {
    assert_eq!(Type::promote(&Type::Byte, &Type::Short), Some(Type::Int));
    assert_eq!(Type::promote(&Type::Int, &Type::Long), Some(Type::Long));
    assert_eq!(Type::promote(&Type::Long, &Type::Float), Some(Type::Float));
    assert_eq!(Type::promote(&Type::Float, &Type::Double), Some(Type::Double));
    assert_eq!(Type::promote(&Type::Int, &Type::String), None);
}

#[test]
fn common_supertype_walks_up_from_the_left() {
    let shape = named("Shape", Some(Type::Any));
    let circle = named("Circle", Some(shape.clone()));
    let square = named("Square", Some(shape.clone()));
    assert_eq!(circle.common_supertype(&square), shape);
    assert_eq!(circle.common_supertype(&shape), shape);
    assert_eq!(Type::Int.common_supertype(&Type::String), Type::Any);
}

#[test]
fn arrays_of_references_follow_their_elements() {
    let shape = named("Shape", Some(Type::Any));
    let circle = named("Circle", Some(shape.clone()));
    assert!(Type::array_of(circle).is_subtype_of(&Type::array_of(shape)));
    assert!(!Type::array_of(Type::Int).is_subtype_of(&Type::array_of(Type::Long)));
    assert!(Type::array_of(Type::Int).is_subtype_of(&Type::Array));
}

#[test]
fn displays_composite_types() {
    let f = Type::func(Type::Int, vec![Type::String, Type::array_of(Type::Bool)]);
    assert_eq!(f.to_string(), "(String,[Bool]):Int");
    assert_eq!(Type::func(Type::None, vec![]).to_string(), "()");
}

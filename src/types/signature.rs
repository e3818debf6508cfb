//! Structural type signatures.
//!
//! Signatures describe the static type of every expression the compiler
//! sees. Matching is structural and deliberately not symmetric: `any`
//! matches everything, a composite matches when either side does, and the
//! other variants match only their own kind.

use std::fmt;

use indexmap::IndexMap;

/// Discriminant of a type signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Nil,
    String,
    Number,
    Boolean,
    List,
    Object,
    Function,
    Any,
    Composite,
    Inner,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeKind::Nil => "nil",
            TypeKind::String => "string",
            TypeKind::Number => "number",
            TypeKind::Boolean => "boolean",
            TypeKind::List => "list",
            TypeKind::Object => "object",
            TypeKind::Function => "function",
            TypeKind::Any => "any",
            TypeKind::Composite => "composite",
            TypeKind::Inner => "inner",
        };
        write!(f, "{}", name)
    }
}

/// A structural type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSignature {
    Nil,
    String,
    Number,
    Boolean,
    /// Homogeneous list with an element type.
    List(Box<TypeSignature>),
    /// Object with named members.
    Object(IndexMap<String, TypeSignature>),
    /// Function with ordered parameters and a yield type.
    Function(FunctionSignature),
    /// Matches anything.
    Any,
    /// Union: matches when either side matches.
    Composite(Box<TypeSignature>, Box<TypeSignature>),
    /// Sentinel resolved to a receiver list's element type when a prototype
    /// method is type checked.
    Inner,
}

/// The signature of a callable value.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub params: Vec<TypeSignature>,
    pub yields: Box<TypeSignature>,
}

impl FunctionSignature {
    pub fn new(params: Vec<TypeSignature>, yields: TypeSignature) -> Self {
        Self {
            params,
            yields: Box::new(yields),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl TypeSignature {
    pub fn kind(&self) -> TypeKind {
        match self {
            TypeSignature::Nil => TypeKind::Nil,
            TypeSignature::String => TypeKind::String,
            TypeSignature::Number => TypeKind::Number,
            TypeSignature::Boolean => TypeKind::Boolean,
            TypeSignature::List(_) => TypeKind::List,
            TypeSignature::Object(_) => TypeKind::Object,
            TypeSignature::Function(_) => TypeKind::Function,
            TypeSignature::Any => TypeKind::Any,
            TypeSignature::Composite(_, _) => TypeKind::Composite,
            TypeSignature::Inner => TypeKind::Inner,
        }
    }

    /// Check if this type signature matches another.
    pub fn matches(&self, other: &TypeSignature) -> bool {
        match self {
            TypeSignature::Any => true,
            TypeSignature::Composite(a, b) => a.matches(other) || b.matches(other),

            TypeSignature::Nil => matches!(other, TypeSignature::Any | TypeSignature::Nil),
            TypeSignature::String => matches!(other, TypeSignature::Any | TypeSignature::String),
            TypeSignature::Number => matches!(other, TypeSignature::Any | TypeSignature::Number),
            TypeSignature::Boolean => matches!(other, TypeSignature::Any | TypeSignature::Boolean),
            TypeSignature::Inner => matches!(other, TypeSignature::Any | TypeSignature::Inner),

            TypeSignature::List(contents) => match other {
                TypeSignature::Any => true,
                TypeSignature::List(other_contents) => other_contents.matches(contents),
                _ => false,
            },

            TypeSignature::Object(members) => match other {
                TypeSignature::Any => true,
                TypeSignature::Object(other_members) => {
                    members.len() == other_members.len()
                        && members.iter().all(|(name, member)| {
                            other_members
                                .get(name)
                                .is_some_and(|v| v.matches(member))
                        })
                }
                _ => false,
            },

            TypeSignature::Function(signature) => match other {
                TypeSignature::Any => true,
                TypeSignature::Function(other_signature) => {
                    signature.yields.matches(&other_signature.yields)
                        && signature.params.len() == other_signature.params.len()
                        && signature
                            .params
                            .iter()
                            .zip(&other_signature.params)
                            .all(|(p, v)| p.matches(v))
                }
                _ => false,
            },
        }
    }

    /// Unify a sequence of element signatures into one list element type.
    /// Homogeneous input keeps the first signature, mixed input widens to
    /// `any`, empty input has no answer.
    pub fn unify_all(signatures: &[TypeSignature]) -> Option<TypeSignature> {
        let first = signatures.first()?;

        for signature in &signatures[1..] {
            if !first.matches(signature) {
                return Some(TypeSignature::Any);
            }
        }

        Some(first.clone())
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSignature::Nil => write!(f, "nil"),
            TypeSignature::String => write!(f, "string"),
            TypeSignature::Number => write!(f, "number"),
            TypeSignature::Boolean => write!(f, "boolean"),
            TypeSignature::List(contents) => write!(f, "list[{}]", contents),
            TypeSignature::Object(members) => {
                write!(f, "object{{")?;
                for (i, (name, member)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, member)?;
                }
                write!(f, "}}")
            }
            TypeSignature::Function(signature) => {
                write!(f, "func(")?;
                for (i, param) in signature.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ") {}", signature.yields)
            }
            TypeSignature::Any => write!(f, "any"),
            TypeSignature::Composite(a, b) => write!(f, "{}|{}", a, b),
            TypeSignature::Inner => write!(f, "inner"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_matches_everything() {
        let any = TypeSignature::Any;
        assert!(any.matches(&TypeSignature::Number));
        assert!(any.matches(&TypeSignature::Nil));
        assert!(any.matches(&TypeSignature::List(Box::new(TypeSignature::String))));
    }

    #[test]
    fn test_primitives_match_their_own_kind() {
        assert!(TypeSignature::Number.matches(&TypeSignature::Number));
        assert!(TypeSignature::Number.matches(&TypeSignature::Any));
        assert!(!TypeSignature::Number.matches(&TypeSignature::String));
        assert!(!TypeSignature::Boolean.matches(&TypeSignature::Nil));
    }

    #[test]
    fn test_list_matching_is_structural() {
        let numbers = TypeSignature::List(Box::new(TypeSignature::Number));
        let strings = TypeSignature::List(Box::new(TypeSignature::String));
        assert!(numbers.matches(&numbers.clone()));
        assert!(!numbers.matches(&strings));
    }

    #[test]
    fn test_composite_matches_either_side() {
        let composite = TypeSignature::Composite(
            Box::new(TypeSignature::Number),
            Box::new(TypeSignature::String),
        );
        assert!(composite.matches(&TypeSignature::Number));
        assert!(composite.matches(&TypeSignature::String));
        assert!(!composite.matches(&TypeSignature::Boolean));
    }

    #[test]
    fn test_matching_is_not_symmetric() {
        // a plain number does not match a composite, even though the
        // composite matches a number
        let composite = TypeSignature::Composite(
            Box::new(TypeSignature::Number),
            Box::new(TypeSignature::String),
        );
        assert!(!TypeSignature::Number.matches(&composite));
    }

    #[test]
    fn test_function_matching() {
        let add = TypeSignature::Function(FunctionSignature::new(
            vec![TypeSignature::Number, TypeSignature::Number],
            TypeSignature::Number,
        ));
        assert!(add.matches(&add.clone()));

        let unary = TypeSignature::Function(FunctionSignature::new(
            vec![TypeSignature::Number],
            TypeSignature::Number,
        ));
        assert!(!add.matches(&unary));
    }

    #[test]
    fn test_object_matching_requires_same_members() {
        let mut members = IndexMap::new();
        members.insert("x".to_string(), TypeSignature::Number);
        let point = TypeSignature::Object(members.clone());

        members.insert("y".to_string(), TypeSignature::Number);
        let wider = TypeSignature::Object(members);

        assert!(point.matches(&point.clone()));
        assert!(!point.matches(&wider));
        assert!(!wider.matches(&point));
    }

    #[test]
    fn test_unify_all() {
        assert_eq!(
            TypeSignature::unify_all(&[TypeSignature::Number, TypeSignature::Number]),
            Some(TypeSignature::Number)
        );
        assert_eq!(
            TypeSignature::unify_all(&[TypeSignature::Number, TypeSignature::String]),
            Some(TypeSignature::Any)
        );
        assert_eq!(TypeSignature::unify_all(&[]), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            TypeSignature::List(Box::new(TypeSignature::Number)).to_string(),
            "list[number]"
        );
        assert_eq!(
            TypeSignature::Function(FunctionSignature::new(
                vec![TypeSignature::String],
                TypeSignature::Nil
            ))
            .to_string(),
            "func(string) nil"
        );
        assert_eq!(
            TypeSignature::Composite(
                Box::new(TypeSignature::Number),
                Box::new(TypeSignature::Nil)
            )
            .to_string(),
            "number|nil"
        );
    }
}

/*
 * Field / Method Descriptor Parsing
 *
 * Turns JVM descriptors ("(Ljava/lang/String;I)V") into typed parameter and
 * return lists. Class names are reported dotted; array types keep a "[]"
 * suffix per dimension.
 */

use crate::errors::{PaintError, Result};
use crate::shared::models::abstract_type::AbstractType;

/// A declared Java type as it appears in a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JavaType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object(String),
    Array(Box<JavaType>),
}

impl JavaType {
    /// Slots this type occupies in the local-variable array.
    pub fn slots(&self) -> usize {
        match self {
            JavaType::Long | JavaType::Double => 2,
            _ => 1,
        }
    }

    /// Projection onto the verification-type lattice.
    pub fn abstract_type(&self) -> AbstractType {
        match self {
            JavaType::Boolean | JavaType::Byte | JavaType::Char | JavaType::Short | JavaType::Int => {
                AbstractType::Int
            }
            JavaType::Long => AbstractType::Long,
            JavaType::Float => AbstractType::Float,
            JavaType::Double => AbstractType::Double,
            JavaType::Object(name) => AbstractType::Reference(name.clone()),
            JavaType::Array(_) => AbstractType::Reference(self.display_name()),
        }
    }

    /// Dotted source-style rendering ("java.lang.String", "int[]").
    pub fn display_name(&self) -> String {
        match self {
            JavaType::Boolean => "boolean".to_string(),
            JavaType::Byte => "byte".to_string(),
            JavaType::Char => "char".to_string(),
            JavaType::Short => "short".to_string(),
            JavaType::Int => "int".to_string(),
            JavaType::Long => "long".to_string(),
            JavaType::Float => "float".to_string(),
            JavaType::Double => "double".to_string(),
            JavaType::Object(name) => name.clone(),
            JavaType::Array(inner) => format!("{}[]", inner.display_name()),
        }
    }
}

/// Parsed method descriptor: parameter types plus optional return type
/// (`None` means void).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<JavaType>,
    pub ret: Option<JavaType>,
}

impl MethodDescriptor {
    /// Total local-variable slots the parameters occupy (receiver excluded).
    pub fn param_slots(&self) -> usize {
        self.params.iter().map(JavaType::slots).sum()
    }
}

fn parse_type(chars: &mut std::str::Chars<'_>, whole: &str) -> Result<JavaType> {
    let c = chars
        .next()
        .ok_or_else(|| PaintError::MalformedDescriptor(whole.to_string()))?;
    match c {
        'Z' => Ok(JavaType::Boolean),
        'B' => Ok(JavaType::Byte),
        'C' => Ok(JavaType::Char),
        'S' => Ok(JavaType::Short),
        'I' => Ok(JavaType::Int),
        'J' => Ok(JavaType::Long),
        'F' => Ok(JavaType::Float),
        'D' => Ok(JavaType::Double),
        '[' => Ok(JavaType::Array(Box::new(parse_type(chars, whole)?))),
        'L' => {
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == ';' {
                    return Ok(JavaType::Object(name.replace('/', ".")));
                }
                name.push(c);
            }
            Err(PaintError::MalformedDescriptor(whole.to_string()))
        }
        _ => Err(PaintError::MalformedDescriptor(whole.to_string())),
    }
}

/// Parse a field descriptor such as `Ljava/lang/String;` or `[I`.
pub fn parse_field_descriptor(descriptor: &str) -> Result<JavaType> {
    let mut chars = descriptor.chars();
    let ty = parse_type(&mut chars, descriptor)?;
    if chars.next().is_some() {
        return Err(PaintError::MalformedDescriptor(descriptor.to_string()));
    }
    Ok(ty)
}

/// Parse a method descriptor such as `(Ljava/lang/String;I)V`.
pub fn parse_method_descriptor(descriptor: &str) -> Result<MethodDescriptor> {
    let mut chars = descriptor.chars();
    if chars.next() != Some('(') {
        return Err(PaintError::MalformedDescriptor(descriptor.to_string()));
    }
    let mut params = Vec::new();
    loop {
        let rest = chars.as_str();
        if rest.starts_with(')') {
            chars.next();
            break;
        }
        if rest.is_empty() {
            return Err(PaintError::MalformedDescriptor(descriptor.to_string()));
        }
        params.push(parse_type(&mut chars, descriptor)?);
    }
    let ret = if chars.as_str() == "V" {
        None
    } else {
        let ty = parse_type(&mut chars, descriptor)?;
        if chars.next().is_some() {
            return Err(PaintError::MalformedDescriptor(descriptor.to_string()));
        }
        Some(ty)
    };
    Ok(MethodDescriptor { params, ret })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_method() {
        let d = parse_method_descriptor("(Ljava/lang/String;I)V").unwrap();
        assert_eq!(
            d.params,
            vec![JavaType::Object("java.lang.String".into()), JavaType::Int]
        );
        assert_eq!(d.ret, None);
        assert_eq!(d.param_slots(), 2);
    }

    #[test]
    fn test_parse_wide_and_array_params() {
        let d = parse_method_descriptor("(J[Ljava/lang/String;D)Ljava/lang/Object;").unwrap();
        assert_eq!(d.params.len(), 3);
        assert_eq!(d.param_slots(), 5);
        assert_eq!(d.params[1].display_name(), "java.lang.String[]");
        assert_eq!(
            d.ret,
            Some(JavaType::Object("java.lang.Object".into()))
        );
    }

    #[test]
    fn test_parse_field_descriptor() {
        assert_eq!(parse_field_descriptor("I").unwrap(), JavaType::Int);
        assert_eq!(
            parse_field_descriptor("[J").unwrap().display_name(),
            "long[]"
        );
        assert!(parse_field_descriptor("Ljava/lang/String").is_err());
        assert!(parse_field_descriptor("II").is_err());
    }

    #[test]
    fn test_reject_malformed_method_descriptors() {
        assert!(parse_method_descriptor("Ljava/lang/String;").is_err());
        assert!(parse_method_descriptor("(").is_err());
        assert!(parse_method_descriptor("()").is_err());
        assert!(parse_method_descriptor("()VV").is_err());
    }
}

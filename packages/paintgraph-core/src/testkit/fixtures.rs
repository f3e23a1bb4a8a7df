/*
 * In-Memory Fixtures
 *
 * A `ClassResolver` over assembled fixture classes (with a configurable
 * subtype table) and a `RuleProvider` with programmatic source/sink
 * registration. These stand in for the real class-pool and rule database
 * in unit and scenario tests.
 */

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::errors::{PaintError, Result};
use crate::features::colored::domain::{ColorKind, ColoredObject, PaintedColor, TraceItem};
use crate::features::colored::ports::{MethodColorRules, RuleProvider};
use crate::shared::models::{FieldRef, MethodBody, MethodRef, TypeHierarchy};
use crate::shared::ports::ClassResolver;
use crate::testkit::assemble::ClassBuilder;
use crate::testkit::verify::analyze_code;

const OBJECT: &str = "java.lang.Object";

/// Superclass chains for the fixture universe.
#[derive(Debug, Clone, Default)]
struct SupertypeTable {
    parents: FxHashMap<String, String>,
}

impl TypeHierarchy for SupertypeTable {
    fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup || sup == OBJECT {
            return true;
        }
        let mut cursor = sub;
        for _ in 0..64 {
            match self.parents.get(cursor) {
                Some(parent) if parent == sup => return true,
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        false
    }

    fn common_superclass(&self, a: &str, b: &str) -> String {
        if self.is_subtype(a, b) {
            return b.to_string();
        }
        if self.is_subtype(b, a) {
            return a.to_string();
        }
        let mut cursor = a;
        for _ in 0..64 {
            match self.parents.get(cursor) {
                Some(parent) => {
                    if self.is_subtype(b, parent) {
                        return parent.clone();
                    }
                    cursor = parent;
                }
                None => break,
            }
        }
        OBJECT.to_string()
    }
}

struct FixtureMethod {
    is_static: bool,
    body: Option<Arc<MethodBody>>,
}

struct FixtureClass {
    superclass: String,
    /// keyed by (name, descriptor)
    methods: FxHashMap<(String, String), FixtureMethod>,
}

/// In-memory class resolver over assembled fixture classes.
#[derive(Default)]
pub struct FixtureResolver {
    classes: FxHashMap<String, FixtureClass>,
    hierarchy: SupertypeTable,
}

impl FixtureResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a subtype edge without registering a class body.
    pub fn set_supertype(&mut self, sub: &str, sup: &str) {
        self.hierarchy
            .parents
            .insert(sub.to_string(), sup.to_string());
    }

    /// Assemble, verify, and register a fixture class.
    pub fn add_class(&mut self, builder: ClassBuilder) -> Result<()> {
        self.hierarchy
            .parents
            .insert(builder.name.clone(), builder.superclass.clone());

        let mut methods = FxHashMap::default();
        for mut method in builder.methods {
            method.finalize();
            let body = if method.has_code {
                let max_locals = method.resolved_max_locals();
                let (frames, control_flow) = analyze_code(
                    &builder.name,
                    method.is_static,
                    &method.descriptor,
                    &method.code,
                    &method.pool,
                    max_locals,
                    &self.hierarchy,
                )?;
                Some(Arc::new(MethodBody {
                    method: MethodRef::new(&builder.name, &method.name, &method.descriptor),
                    is_static: method.is_static,
                    max_locals,
                    bytecode: method.code.clone(),
                    const_pool: method.pool.clone(),
                    frames,
                    control_flow,
                }))
            } else {
                None
            };
            methods.insert(
                (method.name.clone(), method.descriptor.clone()),
                FixtureMethod {
                    is_static: method.is_static,
                    body,
                },
            );
        }
        self.classes.insert(
            builder.name.clone(),
            FixtureClass {
                superclass: builder.superclass,
                methods,
            },
        );
        Ok(())
    }

    /// First registered method with the given name, for test convenience.
    pub fn method_ref(&self, class: &str, name: &str) -> Option<MethodRef> {
        let fixture = self.classes.get(class)?;
        fixture
            .methods
            .keys()
            .find(|(n, _)| n == name)
            .map(|(n, d)| MethodRef::new(class, n.clone(), d.clone()))
    }

    pub fn is_method_static(&self, method: &MethodRef) -> Option<bool> {
        self.classes
            .get(&method.class_name)?
            .methods
            .get(&(method.name.clone(), method.descriptor.clone()))
            .map(|m| m.is_static)
    }
}

impl TypeHierarchy for FixtureResolver {
    fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        self.hierarchy.is_subtype(sub, sup)
    }

    fn common_superclass(&self, a: &str, b: &str) -> String {
        self.hierarchy.common_superclass(a, b)
    }
}

impl ClassResolver for FixtureResolver {
    fn get_method(&self, class: &str, name: &str, descriptor: &str) -> Result<MethodRef> {
        if !self.classes.contains_key(class) {
            return Err(PaintError::ClassNotFound(class.to_string()));
        }
        let key = (name.to_string(), descriptor.to_string());
        let mut cursor = class.to_string();
        for _ in 0..64 {
            let Some(fixture) = self.classes.get(&cursor) else {
                break;
            };
            if fixture.methods.contains_key(&key) {
                return Ok(MethodRef::new(cursor, name, descriptor));
            }
            cursor = fixture.superclass.clone();
        }
        Err(PaintError::MethodNotFound {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    fn get_field(&self, class: &str, name: &str, descriptor: &str) -> Result<FieldRef> {
        // fields are not modeled per-class; any field on a known class (or
        // the platform namespace) resolves
        if self.classes.contains_key(class) || class.starts_with("java.") {
            Ok(FieldRef {
                class_name: class.to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })
        } else {
            Err(PaintError::ClassNotFound(class.to_string()))
        }
    }

    fn method_body(&self, method: &MethodRef) -> Result<Option<Arc<MethodBody>>> {
        let fixture = self
            .classes
            .get(&method.class_name)
            .ok_or_else(|| PaintError::ClassNotFound(method.class_name.clone()))?;
        let found = fixture
            .methods
            .get(&(method.name.clone(), method.descriptor.clone()))
            .ok_or_else(|| PaintError::MethodNotFound {
                class: method.class_name.clone(),
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
            })?;
        Ok(found.body.clone())
    }
}

/// In-memory rule provider with programmatic registration. Method rules are
/// keyed by (class, name); descriptors are ignored, which is enough for
/// fixtures.
#[derive(Default)]
pub struct RuleSet {
    methods: FxHashMap<(String, String), MethodColorRules>,
    fields: FxHashMap<(String, String), ColorKind>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a color on one parameter (receiver-inclusive index).
    pub fn color_parameter(&mut self, class: &str, method: &str, index: usize, kind: ColorKind) {
        let rules = self
            .methods
            .entry((class.to_string(), method.to_string()))
            .or_default();
        if rules.param_colors.len() <= index {
            rules.param_colors.resize(index + 1, None);
        }
        rules.param_colors[index] = Some(kind);
    }

    pub fn color_result(&mut self, class: &str, method: &str, kind: ColorKind) {
        self.methods
            .entry((class.to_string(), method.to_string()))
            .or_default()
            .result_color = Some(kind);
    }

    pub fn color_field(&mut self, class: &str, field: &str, kind: ColorKind) {
        self.fields
            .insert((class.to_string(), field.to_string()), kind);
    }
}

impl RuleProvider for RuleSet {
    fn method_rules(
        &self,
        class: &str,
        name: &str,
        _descriptor: &str,
    ) -> Option<MethodColorRules> {
        self.methods
            .get(&(class.to_string(), name.to_string()))
            .cloned()
    }

    fn field_rules(&self, class: &str, name: &str) -> Option<ColorKind> {
        self.fields
            .get(&(class.to_string(), name.to_string()))
            .copied()
    }
}

/// Dominant color kind per boundary position.
pub fn kinds(colors: &[Option<ColoredObject>]) -> Vec<Option<ColorKind>> {
    crate::features::session::color_kinds(colors)
}

/// A ready-made explicit source coloring for the given class key.
pub fn source_of(class: &str) -> ColoredObject {
    ColoredObject::for_root(
        class,
        PaintedColor::explicit(ColorKind::SourceData, TraceItem::root("test source")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::assemble::MethodAsm;

    #[test]
    fn test_supertype_chain() {
        let mut resolver = FixtureResolver::new();
        resolver.set_supertype("demo.Sub", "demo.Base");
        resolver.set_supertype("demo.Base", OBJECT);
        assert!(resolver.is_subtype("demo.Sub", "demo.Base"));
        assert!(resolver.is_subtype("demo.Sub", OBJECT));
        assert!(!resolver.is_subtype("demo.Base", "demo.Sub"));
        assert_eq!(resolver.common_superclass("demo.Sub", "demo.Base"), "demo.Base");
    }

    #[test]
    fn test_method_resolution_walks_superclasses() {
        let mut resolver = FixtureResolver::new();
        resolver
            .add_class(
                ClassBuilder::new("demo.Base")
                    .method(MethodAsm::new("greet", "()V").vreturn()),
            )
            .unwrap();
        resolver
            .add_class(ClassBuilder::new("demo.Sub").superclass("demo.Base"))
            .unwrap();
        let resolved = resolver.get_method("demo.Sub", "greet", "()V").unwrap();
        assert_eq!(resolved.class_name, "demo.Base");
        assert!(resolver
            .get_method("demo.Sub", "missing", "()V")
            .is_err());
        assert!(resolver.get_method("demo.Missing", "greet", "()V").is_err());
    }

    #[test]
    fn test_bodyless_method_has_no_body() {
        let mut resolver = FixtureResolver::new();
        resolver
            .add_class(
                ClassBuilder::new("demo.Db")
                    .abstract_method("execute", "(Ljava/lang/String;)V", false),
            )
            .unwrap();
        let method = resolver.method_ref("demo.Db", "execute").unwrap();
        assert!(resolver.method_body(&method).unwrap().is_none());
    }

    #[test]
    fn test_rule_registration() {
        let mut rules = RuleSet::new();
        rules.color_parameter("demo.Simple", "append", 2, ColorKind::SourceData);
        rules.color_parameter("demo.Simple", "append", 3, ColorKind::SourceData);
        rules.color_result("demo.Gen", "token", ColorKind::SourceData);
        let m = rules.method_rules("demo.Simple", "append", "whatever").unwrap();
        assert_eq!(m.param_colors.len(), 4);
        assert_eq!(m.param_colors[2], Some(ColorKind::SourceData));
        assert_eq!(m.param_colors[0], None);
        assert!(rules.method_rules("demo.Simple", "missing", "").is_none());
    }
}

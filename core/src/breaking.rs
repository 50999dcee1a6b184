//! Breaking-change detection between two package sets.
//!
//! A [`BreakingChecker`] runs a fixed battery of [`Rule`]s over a *from*
//! (previous) and a *to* (current) [`PackageSet`]. Deletion rules walk the
//! from side only; identity rules walk elements present on both sides.
//!
//! # Examples
//!
//! ```
//! use protoforge_core::{BreakingChecker, BreakingConfig, PackageSet};
//!
//! let empty = PackageSet::default();
//! let checker = BreakingChecker::new(BreakingConfig::default());
//! assert!(checker.check(&empty, &empty).is_empty());
//! assert!(checker.rules().iter().any(|r| r.id == "PACKAGES_NO_BETA_DEPS"));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::{Enum, Message, Package, PackageSet, Service, is_beta_package};
use crate::failure::{Failure, sort_failures};

/// Policy for a breaking-change check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakingConfig {
    /// Check beta packages too. When off, beta packages are removed from
    /// both sides before any rule runs.
    #[serde(default)]
    pub include_beta: bool,
    /// Allow stable packages to depend on beta packages. Only consulted when
    /// `include_beta` is off.
    #[serde(default)]
    pub allow_beta_deps: bool,
}

type CheckFn = fn(&PackageSet, &PackageSet, &mut Emitter<'_>);

/// One named compatibility check.
#[derive(Clone, Copy)]
pub struct Rule {
    pub id: &'static str,
    pub purpose: &'static str,
    check: CheckFn,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("purpose", &self.purpose)
            .finish()
    }
}

impl Rule {
    const fn new(id: &'static str, purpose: &'static str, check: CheckFn) -> Self {
        Self { id, purpose, check }
    }

    /// Runs this rule alone and returns its failures unsorted.
    pub fn apply(&self, from: &PackageSet, to: &PackageSet) -> Vec<Failure> {
        let mut failures = Vec::new();
        let mut emitter = Emitter {
            id: self.id,
            failures: &mut failures,
        };
        (self.check)(from, to, &mut emitter);
        failures
    }
}

/// Collects failures stamped with the running rule's id.
struct Emitter<'a> {
    id: &'static str,
    failures: &'a mut Vec<Failure>,
}

impl Emitter<'_> {
    fn emit(&mut self, message: String) {
        self.failures.push(Failure::unpositioned(self.id, message));
    }
}

const BASE_RULES: &[Rule] = &[
    Rule::new(
        "PACKAGES_NOT_DELETED",
        "Verifies that no packages are deleted.",
        packages_not_deleted,
    ),
    Rule::new(
        "MESSAGES_NOT_DELETED",
        "Verifies that no messages are deleted.",
        messages_not_deleted,
    ),
    Rule::new(
        "ENUMS_NOT_DELETED",
        "Verifies that no enums are deleted.",
        enums_not_deleted,
    ),
    Rule::new(
        "MESSAGE_FIELDS_NOT_DELETED",
        "Verifies that no message fields are deleted.",
        message_fields_not_deleted,
    ),
    Rule::new(
        "MESSAGE_ONEOFS_NOT_DELETED",
        "Verifies that no message oneofs are deleted.",
        message_oneofs_not_deleted,
    ),
    Rule::new(
        "ENUM_VALUES_NOT_DELETED",
        "Verifies that no enum values are deleted.",
        enum_values_not_deleted,
    ),
    Rule::new(
        "SERVICES_NOT_DELETED",
        "Verifies that no services are deleted.",
        services_not_deleted,
    ),
    Rule::new(
        "SERVICE_METHODS_NOT_DELETED",
        "Verifies that no service methods are deleted.",
        service_methods_not_deleted,
    ),
    Rule::new(
        "MESSAGE_FIELDS_SAME_NAME",
        "Verifies that message fields keep the same name for a given number.",
        message_fields_same_name,
    ),
    Rule::new(
        "MESSAGE_FIELDS_SAME_TYPE",
        "Verifies that message fields keep the same type for a given number.",
        message_fields_same_type,
    ),
    Rule::new(
        "MESSAGE_FIELDS_SAME_LABEL",
        "Verifies that message fields keep the same label for a given number.",
        message_fields_same_label,
    ),
    Rule::new(
        "MESSAGE_FIELDS_SAME_ONEOF",
        "Verifies that message fields are not moved into a oneof.",
        message_fields_same_oneof,
    ),
    Rule::new(
        "MESSAGE_ONEOFS_FIELDS_NOT_REMOVED",
        "Verifies that no fields are removed from message oneofs.",
        message_oneofs_fields_not_removed,
    ),
    Rule::new(
        "ENUM_VALUES_SAME_NAME",
        "Verifies that enum values keep the same name for a given number.",
        enum_values_same_name,
    ),
    Rule::new(
        "SERVICE_METHODS_SAME_REQUEST_TYPE",
        "Verifies that service methods keep the same request type.",
        service_methods_same_request_type,
    ),
    Rule::new(
        "SERVICE_METHODS_SAME_RESPONSE_TYPE",
        "Verifies that service methods keep the same response type.",
        service_methods_same_response_type,
    ),
    Rule::new(
        "SERVICE_METHODS_SAME_CLIENT_STREAMING",
        "Verifies that service methods keep the same client streaming setting.",
        service_methods_same_client_streaming,
    ),
    Rule::new(
        "SERVICE_METHODS_SAME_SERVER_STREAMING",
        "Verifies that service methods keep the same server streaming setting.",
        service_methods_same_server_streaming,
    ),
];

const NO_BETA_DEPS_RULE: Rule = Rule::new(
    "PACKAGES_NO_BETA_DEPS",
    "Verifies that non-beta packages do not depend on beta packages.",
    packages_no_beta_deps,
);

/// Runs the rule battery selected by a [`BreakingConfig`].
#[derive(Debug, Clone)]
pub struct BreakingChecker {
    config: BreakingConfig,
    rules: Vec<Rule>,
}

impl BreakingChecker {
    pub fn new(config: BreakingConfig) -> Self {
        let mut rules = BASE_RULES.to_vec();
        if !config.include_beta && !config.allow_beta_deps {
            rules.push(NO_BETA_DEPS_RULE);
        }
        Self { config, rules }
    }

    pub fn config(&self) -> BreakingConfig {
        self.config
    }

    /// Rules this checker runs, in execution order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Compares `from` against `to` and returns sorted failures.
    pub fn check(&self, from: &PackageSet, to: &PackageSet) -> Vec<Failure> {
        let filtered;
        let (from, to) = if self.config.include_beta {
            (from, to)
        } else {
            filtered = (from.without_beta(), to.without_beta());
            (&filtered.0, &filtered.1)
        };

        let mut failures = Vec::new();
        for rule in &self.rules {
            let found = rule.apply(from, to);
            if !found.is_empty() {
                debug!(rule = rule.id, count = found.len(), "breaking rule reported failures");
            }
            failures.extend(found);
        }
        sort_failures(&mut failures);
        failures
    }
}

impl Default for BreakingChecker {
    fn default() -> Self {
        Self::new(BreakingConfig::default())
    }
}

// Traversal helpers. Pairs are produced in name order.

fn package_pairs<'a>(from: &'a PackageSet, to: &'a PackageSet) -> Vec<(&'a Package, &'a Package)> {
    from.packages()
        .iter()
        .filter_map(|f| to.get(f.name()).map(|t| (f, t)))
        .collect()
}

fn collect_message_pairs<'a>(
    from: impl IntoIterator<Item = (&'a String, &'a Message)>,
    to: &'a std::collections::BTreeMap<String, Message>,
    out: &mut Vec<(&'a Message, &'a Message)>,
) {
    for (name, from_message) in from {
        if let Some(to_message) = to.get(name) {
            out.push((from_message, to_message));
            collect_message_pairs(&from_message.nested_messages, &to_message.nested_messages, out);
        }
    }
}

/// Messages with the same fully-qualified name on both sides, including
/// nested messages whose parents survive.
fn message_pairs<'a>(from: &'a PackageSet, to: &'a PackageSet) -> Vec<(&'a Message, &'a Message)> {
    let mut out = Vec::new();
    for (from_package, to_package) in package_pairs(from, to) {
        collect_message_pairs(&from_package.messages, &to_package.messages, &mut out);
    }
    out
}

/// Enums with the same fully-qualified name on both sides.
fn enum_pairs<'a>(from: &'a PackageSet, to: &'a PackageSet) -> Vec<(&'a Enum, &'a Enum)> {
    let mut out = Vec::new();
    for (from_package, to_package) in package_pairs(from, to) {
        for (name, from_enum) in &from_package.enums {
            if let Some(to_enum) = to_package.enums.get(name) {
                out.push((from_enum, to_enum));
            }
        }
    }
    for (from_message, to_message) in message_pairs(from, to) {
        for (name, from_enum) in &from_message.nested_enums {
            if let Some(to_enum) = to_message.nested_enums.get(name) {
                out.push((from_enum, to_enum));
            }
        }
    }
    out
}

fn service_pairs<'a>(from: &'a PackageSet, to: &'a PackageSet) -> Vec<(&'a Service, &'a Service)> {
    let mut out = Vec::new();
    for (from_package, to_package) in package_pairs(from, to) {
        for (name, from_service) in &from_package.services {
            if let Some(to_service) = to_package.services.get(name) {
                out.push((from_service, to_service));
            }
        }
    }
    out
}

fn for_each_field_pair(
    from: &PackageSet,
    to: &PackageSet,
    mut f: impl FnMut(&Message, &crate::descriptor::Field, &crate::descriptor::Field),
) {
    for (from_message, to_message) in message_pairs(from, to) {
        for from_field in from_message.fields_by_number() {
            if let Some(to_field) = to_message.field_by_number(from_field.number) {
                f(from_message, from_field, to_field);
            }
        }
    }
}

fn for_each_method_pair(
    from: &PackageSet,
    to: &PackageSet,
    mut f: impl FnMut(&Service, &crate::descriptor::Method, &crate::descriptor::Method),
) {
    for (from_service, to_service) in service_pairs(from, to) {
        for (name, from_method) in &from_service.methods {
            if let Some(to_method) = to_service.methods.get(name) {
                f(from_service, from_method, to_method);
            }
        }
    }
}

// Deletion rules.

fn packages_not_deleted(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for package in from.packages() {
        if !to.contains(package.name()) {
            emitter.emit(format!("Package \"{}\" was deleted.", package.name()));
        }
    }
}

fn report_deleted_messages(
    from: &std::collections::BTreeMap<String, Message>,
    to: &std::collections::BTreeMap<String, Message>,
    emitter: &mut Emitter<'_>,
) {
    for (name, from_message) in from {
        match to.get(name) {
            Some(to_message) => report_deleted_messages(
                &from_message.nested_messages,
                &to_message.nested_messages,
                emitter,
            ),
            None => emitter.emit(format!("Message \"{}\" was deleted.", from_message.full_name())),
        }
    }
}

fn messages_not_deleted(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for (from_package, to_package) in package_pairs(from, to) {
        report_deleted_messages(&from_package.messages, &to_package.messages, emitter);
    }
}

fn enums_not_deleted(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for (from_package, to_package) in package_pairs(from, to) {
        for (name, from_enum) in &from_package.enums {
            if !to_package.enums.contains_key(name) {
                emitter.emit(format!("Enum \"{}\" was deleted.", from_enum.full_name()));
            }
        }
    }
    for (from_message, to_message) in message_pairs(from, to) {
        for (name, from_enum) in &from_message.nested_enums {
            if !to_message.nested_enums.contains_key(name) {
                emitter.emit(format!("Enum \"{}\" was deleted.", from_enum.full_name()));
            }
        }
    }
}

fn message_fields_not_deleted(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for (from_message, to_message) in message_pairs(from, to) {
        for from_field in from_message.fields_by_number() {
            if to_message.field_by_number(from_field.number).is_none() {
                emitter.emit(format!(
                    "Message field \"{}\" on message \"{}\" was deleted.",
                    from_field.number,
                    from_message.full_name()
                ));
            }
        }
    }
}

fn message_oneofs_not_deleted(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for (from_message, to_message) in message_pairs(from, to) {
        for name in from_message.oneofs.keys() {
            if !to_message.oneofs.contains_key(name) {
                emitter.emit(format!(
                    "Message oneof \"{}\" on message \"{}\" was deleted.",
                    name,
                    from_message.full_name()
                ));
            }
        }
    }
}

fn enum_values_not_deleted(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for (from_enum, to_enum) in enum_pairs(from, to) {
        for number in from_enum.values.keys() {
            if !to_enum.values.contains_key(number) {
                emitter.emit(format!(
                    "Enum value \"{}\" on enum \"{}\" was deleted.",
                    number,
                    from_enum.full_name()
                ));
            }
        }
    }
}

fn services_not_deleted(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for (from_package, to_package) in package_pairs(from, to) {
        for (name, from_service) in &from_package.services {
            if !to_package.services.contains_key(name) {
                emitter.emit(format!("Service \"{}\" was deleted.", from_service.full_name()));
            }
        }
    }
}

fn service_methods_not_deleted(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for (from_service, to_service) in service_pairs(from, to) {
        for name in from_service.methods.keys() {
            if !to_service.methods.contains_key(name) {
                emitter.emit(format!(
                    "Service method \"{}\" on service \"{}\" was deleted.",
                    name,
                    from_service.full_name()
                ));
            }
        }
    }
}

// Identity rules.

fn message_fields_same_name(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for_each_field_pair(from, to, |message, from_field, to_field| {
        if from_field.name() != to_field.name() {
            emitter.emit(format!(
                "Message field \"{}\" on message \"{}\" changed name from \"{}\" to \"{}\".",
                from_field.number,
                message.full_name(),
                from_field.name(),
                to_field.name()
            ));
        }
    });
}

fn message_fields_same_type(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for_each_field_pair(from, to, |message, from_field, to_field| {
        let changed = from_field.field_type != to_field.field_type
            || (from_field.field_type.is_named() && from_field.type_name != to_field.type_name);
        if changed {
            emitter.emit(format!(
                "Message field \"{}\" on message \"{}\" changed type from \"{}\" to \"{}\".",
                from_field.number,
                message.full_name(),
                from_field.type_display(),
                to_field.type_display()
            ));
        }
    });
}

fn message_fields_same_label(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for_each_field_pair(from, to, |message, from_field, to_field| {
        if from_field.label != to_field.label {
            emitter.emit(format!(
                "Message field \"{}\" on message \"{}\" changed label from \"{}\" to \"{}\".",
                from_field.number,
                message.full_name(),
                from_field.label.as_str(),
                to_field.label.as_str()
            ));
        }
    });
}

fn message_fields_same_oneof(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for_each_field_pair(from, to, |message, from_field, to_field| {
        if let (None, Some(oneof)) = (&from_field.oneof, &to_field.oneof) {
            emitter.emit(format!(
                "Message field \"{}\" on message \"{}\" moved to oneof \"{}\".",
                from_field.number,
                message.full_name(),
                oneof
            ));
        }
    });
}

fn message_oneofs_fields_not_removed(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for (from_message, to_message) in message_pairs(from, to) {
        for (name, from_oneof) in &from_message.oneofs {
            let Some(to_oneof) = to_message.oneofs.get(name) else {
                continue;
            };
            for number in from_oneof.field_numbers.difference(&to_oneof.field_numbers) {
                emitter.emit(format!(
                    "Message oneof \"{}\" on message \"{}\" had field \"{}\" removed.",
                    name,
                    from_message.full_name(),
                    number
                ));
            }
        }
    }
}

fn enum_values_same_name(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for (from_enum, to_enum) in enum_pairs(from, to) {
        for (number, from_value) in &from_enum.values {
            let Some(to_value) = to_enum.values.get(number) else {
                continue;
            };
            if from_value.name() != to_value.name() {
                emitter.emit(format!(
                    "Enum value \"{}\" on enum \"{}\" changed name from \"{}\" to \"{}\".",
                    number,
                    from_enum.full_name(),
                    from_value.name(),
                    to_value.name()
                ));
            }
        }
    }
}

fn service_methods_same_request_type(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for_each_method_pair(from, to, |service, from_method, to_method| {
        if from_method.request_type != to_method.request_type {
            emitter.emit(format!(
                "Service method \"{}\" on service \"{}\" changed request type from \"{}\" to \"{}\".",
                from_method.name(),
                service.full_name(),
                from_method.request_type,
                to_method.request_type
            ));
        }
    });
}

fn service_methods_same_response_type(from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for_each_method_pair(from, to, |service, from_method, to_method| {
        if from_method.response_type != to_method.response_type {
            emitter.emit(format!(
                "Service method \"{}\" on service \"{}\" changed response type from \"{}\" to \"{}\".",
                from_method.name(),
                service.full_name(),
                from_method.response_type,
                to_method.response_type
            ));
        }
    });
}

fn service_methods_same_client_streaming(
    from: &PackageSet,
    to: &PackageSet,
    emitter: &mut Emitter<'_>,
) {
    for_each_method_pair(from, to, |service, from_method, to_method| {
        if from_method.client_streaming != to_method.client_streaming {
            emitter.emit(format!(
                "Service method \"{}\" on service \"{}\" changed client streaming from \"{}\" to \"{}\".",
                from_method.name(),
                service.full_name(),
                from_method.client_streaming,
                to_method.client_streaming
            ));
        }
    });
}

fn service_methods_same_server_streaming(
    from: &PackageSet,
    to: &PackageSet,
    emitter: &mut Emitter<'_>,
) {
    for_each_method_pair(from, to, |service, from_method, to_method| {
        if from_method.server_streaming != to_method.server_streaming {
            emitter.emit(format!(
                "Service method \"{}\" on service \"{}\" changed server streaming from \"{}\" to \"{}\".",
                from_method.name(),
                service.full_name(),
                from_method.server_streaming,
                to_method.server_streaming
            ));
        }
    });
}

// Dependency rule. Beta packages are already filtered out of `to`, but the
// dependency names of the remaining packages still name them.

fn packages_no_beta_deps(_from: &PackageSet, to: &PackageSet, emitter: &mut Emitter<'_>) {
    for package in to.packages() {
        if package.is_beta() {
            continue;
        }
        for dep in &package.dependency_names {
            if is_beta_package(dep) {
                emitter.emit(format!(
                    "Package \"{}\" is not a beta package but has a dependency on beta package \"{}\".",
                    package.name(),
                    dep
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{
        DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
        FileDescriptorProto, FileDescriptorSet, MethodDescriptorProto, OneofDescriptorProto,
        ServiceDescriptorProto,
    };

    fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(ty as i32),
            ..Default::default()
        }
    }

    fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
        DescriptorProto {
            name: Some(name.to_string()),
            field: fields,
            ..Default::default()
        }
    }

    fn package_file(package: &str, messages: Vec<DescriptorProto>) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(format!("{}.proto", package.replace('.', "/"))),
            package: Some(package.to_string()),
            message_type: messages,
            ..Default::default()
        }
    }

    fn packages(files: Vec<FileDescriptorProto>) -> PackageSet {
        PackageSet::from_descriptor_sets(&[FileDescriptorSet { file: files }]).unwrap()
    }

    fn ids(failures: &[Failure]) -> Vec<&str> {
        failures.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn test_identical_sets_produce_no_failures() {
        let set = packages(vec![package_file(
            "foo.v1",
            vec![message("Four", vec![field("one", 1, Type::Int64)])],
        )]);
        let checker = BreakingChecker::new(BreakingConfig {
            include_beta: true,
            allow_beta_deps: false,
        });
        assert!(checker.check(&set, &set).is_empty());
    }

    #[test]
    fn test_nested_message_deletion_under_deleted_parent_is_not_reported() {
        let mut outer = message("Outer", vec![]);
        outer.nested_type.push(message("Inner", vec![]));
        outer.enum_type.push(EnumDescriptorProto {
            name: Some("Kind".to_string()),
            ..Default::default()
        });
        let from = packages(vec![package_file("foo.v1", vec![outer])]);
        let to = packages(vec![package_file("foo.v1", vec![])]);

        let failures = BreakingChecker::default().check(&from, &to);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "MESSAGES_NOT_DELETED");
        assert_eq!(failures[0].message, "Message \"foo.v1.Outer\" was deleted.");
    }

    #[test]
    fn test_nested_enum_deleted_from_surviving_message() {
        let mut outer = message("Outer", vec![]);
        outer.enum_type.push(EnumDescriptorProto {
            name: Some("Kind".to_string()),
            ..Default::default()
        });
        let from = packages(vec![package_file("foo.v1", vec![outer])]);
        let to = packages(vec![package_file("foo.v1", vec![message("Outer", vec![])])]);

        let failures = BreakingChecker::default().check(&from, &to);
        assert_eq!(ids(&failures), vec!["ENUMS_NOT_DELETED"]);
        assert_eq!(failures[0].message, "Enum \"foo.v1.Outer.Kind\" was deleted.");
    }

    #[test]
    fn test_field_rename_label_and_named_type_changes() {
        let from = packages(vec![package_file(
            "foo.v1",
            vec![
                message(
                    "M",
                    vec![
                        field("a", 1, Type::String),
                        FieldDescriptorProto {
                            type_name: Some(".foo.v1.A".to_string()),
                            ..field("b", 2, Type::Message)
                        },
                        field("c", 3, Type::Int32),
                    ],
                ),
                message("A", vec![]),
                message("B", vec![]),
            ],
        )]);
        let to = packages(vec![package_file(
            "foo.v1",
            vec![
                message(
                    "M",
                    vec![
                        field("renamed", 1, Type::String),
                        FieldDescriptorProto {
                            type_name: Some(".foo.v1.B".to_string()),
                            ..field("b", 2, Type::Message)
                        },
                        FieldDescriptorProto {
                            label: Some(Label::Repeated as i32),
                            ..field("c", 3, Type::Int32)
                        },
                    ],
                ),
                message("A", vec![]),
                message("B", vec![]),
            ],
        )]);

        let messages: Vec<String> = BreakingChecker::default()
            .check(&from, &to)
            .into_iter()
            .map(|f| f.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "Message field \"3\" on message \"foo.v1.M\" changed label from \"optional\" to \"repeated\".",
                "Message field \"1\" on message \"foo.v1.M\" changed name from \"a\" to \"renamed\".",
                "Message field \"2\" on message \"foo.v1.M\" changed type from \"foo.v1.A\" to \"foo.v1.B\".",
            ]
        );
    }

    #[test]
    fn test_oneof_moves_are_reported() {
        let oneof = |name: &str| OneofDescriptorProto {
            name: Some(name.to_string()),
            ..Default::default()
        };
        let from = packages(vec![package_file(
            "foo.v1",
            vec![DescriptorProto {
                oneof_decl: vec![oneof("choice")],
                ..message(
                    "M",
                    vec![
                        field("a", 1, Type::String),
                        FieldDescriptorProto {
                            oneof_index: Some(0),
                            ..field("b", 2, Type::String)
                        },
                    ],
                )
            }],
        )]);
        let to = packages(vec![package_file(
            "foo.v1",
            vec![DescriptorProto {
                oneof_decl: vec![oneof("choice")],
                ..message(
                    "M",
                    vec![
                        FieldDescriptorProto {
                            oneof_index: Some(0),
                            ..field("a", 1, Type::String)
                        },
                        field("b", 2, Type::String),
                    ],
                )
            }],
        )]);

        let failures = BreakingChecker::default().check(&from, &to);
        assert_eq!(
            ids(&failures),
            vec!["MESSAGE_FIELDS_SAME_ONEOF", "MESSAGE_ONEOFS_FIELDS_NOT_REMOVED"]
        );
        assert_eq!(
            failures[0].message,
            "Message field \"1\" on message \"foo.v1.M\" moved to oneof \"choice\"."
        );
        assert_eq!(
            failures[1].message,
            "Message oneof \"choice\" on message \"foo.v1.M\" had field \"2\" removed."
        );
    }

    #[test]
    fn test_enum_value_and_service_changes() {
        let value = |name: &str, number: i32| EnumValueDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            ..Default::default()
        };
        let method = |name: &str, input: &str, client_streaming: bool| MethodDescriptorProto {
            name: Some(name.to_string()),
            input_type: Some(input.to_string()),
            output_type: Some(".foo.v1.Resp".to_string()),
            client_streaming: Some(client_streaming),
            ..Default::default()
        };
        let build = |values, methods| {
            let mut file = package_file("foo.v1", vec![]);
            file.enum_type.push(EnumDescriptorProto {
                name: Some("Color".to_string()),
                value: values,
                ..Default::default()
            });
            file.service.push(ServiceDescriptorProto {
                name: Some("Paint".to_string()),
                method: methods,
                ..Default::default()
            });
            packages(vec![file])
        };
        let from = build(
            vec![value("COLOR_INVALID", 0), value("COLOR_RED", 1), value("COLOR_BLUE", 2)],
            vec![
                method("Get", ".foo.v1.Req", false),
                method("Stream", ".foo.v1.Req", false),
                method("Gone", ".foo.v1.Req", false),
            ],
        );
        let to = build(
            vec![value("COLOR_INVALID", 0), value("COLOR_CRIMSON", 1)],
            vec![
                method("Get", ".foo.v1.Other", false),
                method("Stream", ".foo.v1.Req", true),
            ],
        );

        let rendered: Vec<String> = BreakingChecker::default()
            .check(&from, &to)
            .into_iter()
            .map(|f| format!("{}:{}", f.id, f.message))
            .collect();
        assert_eq!(
            rendered,
            vec![
                "ENUM_VALUES_NOT_DELETED:Enum value \"2\" on enum \"foo.v1.Color\" was deleted.",
                "ENUM_VALUES_SAME_NAME:Enum value \"1\" on enum \"foo.v1.Color\" changed name from \"COLOR_RED\" to \"COLOR_CRIMSON\".",
                "SERVICE_METHODS_NOT_DELETED:Service method \"Gone\" on service \"foo.v1.Paint\" was deleted.",
                "SERVICE_METHODS_SAME_CLIENT_STREAMING:Service method \"Stream\" on service \"foo.v1.Paint\" changed client streaming from \"false\" to \"true\".",
                "SERVICE_METHODS_SAME_REQUEST_TYPE:Service method \"Get\" on service \"foo.v1.Paint\" changed request type from \"foo.v1.Req\" to \"foo.v1.Other\".",
            ]
        );
    }

    #[test]
    fn test_beta_dependency_rule_only_added_when_both_flags_off() {
        let default_ids: Vec<&str> = BreakingChecker::default().rules().iter().map(|r| r.id).collect();
        assert!(default_ids.contains(&"PACKAGES_NO_BETA_DEPS"));

        let allow = BreakingChecker::new(BreakingConfig {
            include_beta: false,
            allow_beta_deps: true,
        });
        assert!(allow.rules().iter().all(|r| r.id != "PACKAGES_NO_BETA_DEPS"));

        let include = BreakingChecker::new(BreakingConfig {
            include_beta: true,
            allow_beta_deps: false,
        });
        assert!(include.rules().iter().all(|r| r.id != "PACKAGES_NO_BETA_DEPS"));
        assert_eq!(include.rules().len(), BASE_RULES.len());
    }

    #[test]
    fn test_deleted_beta_package_ignored_unless_included() {
        let from = packages(vec![
            package_file("foo.v1", vec![]),
            package_file("foo.v1beta1", vec![]),
        ]);
        let to = packages(vec![package_file("foo.v1", vec![])]);

        assert!(BreakingChecker::default().check(&from, &to).is_empty());

        let failures = BreakingChecker::new(BreakingConfig {
            include_beta: true,
            allow_beta_deps: false,
        })
        .check(&from, &to);
        assert_eq!(failures[0].message, "Package \"foo.v1beta1\" was deleted.");
    }
}

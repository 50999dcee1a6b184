use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
use protoforge_core::{BreakingChecker, BreakingConfig, PackageSet};

fn file(name: &str, package: &str, deps: &[&str], messages: Vec<DescriptorProto>) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: Some(package.to_string()),
        dependency: deps.iter().map(|d| d.to_string()).collect(),
        message_type: messages,
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

fn four(field_type: Type) -> DescriptorProto {
    DescriptorProto {
        name: Some("Four".to_string()),
        field: vec![FieldDescriptorProto {
            name: Some("value".to_string()),
            number: Some(1),
            label: Some(Label::Optional as i32),
            r#type: Some(field_type as i32),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn set(files: Vec<FileDescriptorProto>) -> PackageSet {
    PackageSet::from_descriptor_sets(&[FileDescriptorSet { file: files }]).unwrap()
}

#[test]
fn test_deleted_package_is_reported() {
    let from = set(vec![
        file("foo/v1/foo.proto", "foo.v1", &[], vec![]),
        file("bar/v1/bar.proto", "bar.v1", &[], vec![]),
    ]);
    let to = set(vec![file("foo/v1/foo.proto", "foo.v1", &[], vec![])]);

    let failures = BreakingChecker::default().check(&from, &to);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, "PACKAGES_NOT_DELETED");
    assert_eq!(failures[0].message, "Package \"bar.v1\" was deleted.");
    assert_eq!(failures[0].filename, "");
}

#[test]
fn test_field_type_change_is_reported() {
    let from = set(vec![file("foo/v1/foo.proto", "foo.v1", &[], vec![four(Type::Int64)])]);
    let to = set(vec![file("foo/v1/foo.proto", "foo.v1", &[], vec![four(Type::Int32)])]);

    let failures = BreakingChecker::default().check(&from, &to);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, "MESSAGE_FIELDS_SAME_TYPE");
    assert_eq!(
        failures[0].message,
        "Message field \"1\" on message \"foo.v1.Four\" changed type from \"int64\" to \"int32\"."
    );
}

#[test]
fn test_beta_dependency_is_forbidden() {
    let files = vec![
        file("bar/v1beta1/bar.proto", "bar.v1beta1", &[], vec![]),
        file("foo/v1/foo.proto", "foo.v1", &["bar/v1beta1/bar.proto"], vec![]),
    ];
    let from = set(files.clone());
    let to = set(files);

    let failures = BreakingChecker::new(BreakingConfig {
        include_beta: false,
        allow_beta_deps: false,
    })
    .check(&from, &to);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, "PACKAGES_NO_BETA_DEPS");
    assert!(failures[0].message.contains("\"foo.v1\""));
    assert!(failures[0].message.contains("\"bar.v1beta1\""));

    let allowed = BreakingChecker::new(BreakingConfig {
        include_beta: false,
        allow_beta_deps: true,
    })
    .check(&from, &to);
    assert!(allowed.is_empty());
}

#[test]
fn test_same_input_on_both_sides_never_fails() {
    let files = vec![
        file("bar/v1beta1/bar.proto", "bar.v1beta1", &[], vec![four(Type::String)]),
        file("foo/v1/foo.proto", "foo.v1", &[], vec![four(Type::Int64)]),
    ];
    let packages = set(files);
    for include_beta in [false, true] {
        let checker = BreakingChecker::new(BreakingConfig {
            include_beta,
            allow_beta_deps: true,
        });
        assert!(checker.check(&packages, &packages).is_empty());
    }
}

#[test]
fn test_beta_packages_on_both_sides_do_not_change_result() {
    let stable_from = vec![file("foo/v1/foo.proto", "foo.v1", &[], vec![four(Type::Int64)])];
    let stable_to = vec![file("foo/v1/foo.proto", "foo.v1", &[], vec![four(Type::Int32)])];
    let beta_from = file("baz/v2beta1/baz.proto", "baz.v2beta1", &[], vec![four(Type::Bool)]);
    let beta_to = file("baz/v2beta1/baz.proto", "baz.v2beta1", &[], vec![four(Type::Bytes)]);

    let checker = BreakingChecker::default();
    let without = checker.check(&set(stable_from.clone()), &set(stable_to.clone()));

    let mut from_with = stable_from;
    from_with.push(beta_from);
    let mut to_with = stable_to;
    to_with.push(beta_to);
    let with = checker.check(&set(from_with), &set(to_with));

    assert_eq!(without, with);
    assert_eq!(without.len(), 1);
}

#[test]
fn test_check_is_deterministic() {
    let from = set(vec![
        file("a/v1/a.proto", "a.v1", &[], vec![four(Type::Int64)]),
        file("b/v1/b.proto", "b.v1", &[], vec![]),
        file("c/v1/c.proto", "c.v1", &[], vec![]),
    ]);
    let to = set(vec![file("a/v1/a.proto", "a.v1", &[], vec![four(Type::Sint64)])]);

    let checker = BreakingChecker::default();
    let first = checker.check(&from, &to);
    let second = checker.check(&from, &to);
    assert_eq!(first, second);
    let ids: Vec<&str> = first.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["MESSAGE_FIELDS_SAME_TYPE", "PACKAGES_NOT_DELETED", "PACKAGES_NOT_DELETED"]
    );
}

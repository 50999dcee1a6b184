//! Package graph built from compiler descriptor output.
//!
//! [`PackageSet::from_descriptor_sets`] turns one or more
//! `google.protobuf.FileDescriptorSet` values into an immutable graph of
//! packages, each holding its enums, messages and services keyed by simple
//! name, plus sorted dependency and importer edges between packages.
//!
//! Packages live in an arena (`Vec<Package>`) indexed by name; edges are
//! stitched in a second pass once every package exists.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use prost::Message as _;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    FileDescriptorSet, ServiceDescriptorProto,
};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Errors raised while building a [`PackageSet`].
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Descriptor bytes could not be decoded.
    #[error("failed to decode descriptor set: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A file descriptor carried no name.
    #[error("descriptor set contains a file with no name")]
    MissingFileName,

    /// The same file was seen twice in one package with different contents.
    #[error("file {file} appears twice in package {package:?} with different contents")]
    FileMismatch { file: String, package: String },

    /// The same file was declared under two different packages.
    #[error("file {file} is declared in package {first:?} and in package {second:?}")]
    FilePackageConflict {
        file: String,
        first: String,
        second: String,
    },
}

/// Decodes a serialized `FileDescriptorSet`.
pub fn decode_descriptor_set(bytes: &[u8]) -> Result<FileDescriptorSet, DescriptorError> {
    Ok(FileDescriptorSet::decode(bytes)?)
}

static BETA_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v(\d+)beta(\d+)$").expect("static regex must compile"));

/// Returns `true` if the last segment of `package` is `vMAJORbetaBETA` with
/// both numbers at least 1.
///
/// ```
/// use protoforge_core::is_beta_package;
///
/// assert!(is_beta_package("foo.bar.v1beta1"));
/// assert!(!is_beta_package("foo.bar.v1"));
/// assert!(!is_beta_package("foo.v0beta1"));
/// ```
pub fn is_beta_package(package: &str) -> bool {
    let last = package.rsplit('.').next().unwrap_or(package);
    let Some(caps) = BETA_SEGMENT.captures(last) else {
        return false;
    };
    let major = caps[1].parse::<u64>().unwrap_or(0);
    let beta = caps[2].parse::<u64>().unwrap_or(0);
    major >= 1 && beta >= 1
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

/// Scalar or named type of a message field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Group,
    Message,
    Bytes,
    Uint32,
    Enum,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
}

impl FieldType {
    fn from_proto(value: Type) -> Self {
        match value {
            Type::Double => Self::Double,
            Type::Float => Self::Float,
            Type::Int64 => Self::Int64,
            Type::Uint64 => Self::Uint64,
            Type::Int32 => Self::Int32,
            Type::Fixed64 => Self::Fixed64,
            Type::Fixed32 => Self::Fixed32,
            Type::Bool => Self::Bool,
            Type::String => Self::String,
            Type::Group => Self::Group,
            Type::Message => Self::Message,
            Type::Bytes => Self::Bytes,
            Type::Uint32 => Self::Uint32,
            Type::Enum => Self::Enum,
            Type::Sfixed32 => Self::Sfixed32,
            Type::Sfixed64 => Self::Sfixed64,
            Type::Sint32 => Self::Sint32,
            Type::Sint64 => Self::Sint64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Float => "float",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Int32 => "int32",
            Self::Fixed64 => "fixed64",
            Self::Fixed32 => "fixed32",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Group => "group",
            Self::Message => "message",
            Self::Bytes => "bytes",
            Self::Uint32 => "uint32",
            Self::Enum => "enum",
            Self::Sfixed32 => "sfixed32",
            Self::Sfixed64 => "sfixed64",
            Self::Sint32 => "sint32",
            Self::Sint64 => "sint64",
        }
    }

    /// Message, enum and group fields refer to another type by name.
    pub fn is_named(self) -> bool {
        matches!(self, Self::Message | Self::Enum | Self::Group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldLabel {
    Optional,
    Required,
    Repeated,
}

impl FieldLabel {
    fn from_proto(value: Label) -> Self {
        match value {
            Label::Optional => Self::Optional,
            Label::Required => Self::Required,
            Label::Repeated => Self::Repeated,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optional => "optional",
            Self::Required => "required",
            Self::Repeated => "repeated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    full_name: String,
    pub number: i32,
    pub field_type: FieldType,
    /// Referenced type without the leading dot; empty for scalars.
    pub type_name: String,
    pub label: FieldLabel,
    /// Name of the containing oneof, if any. Synthetic proto3 `optional`
    /// oneofs are not recorded.
    pub oneof: Option<String>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Type as shown to users: the referenced type name for named types,
    /// the scalar keyword otherwise.
    pub fn type_display(&self) -> &str {
        if self.field_type.is_named() && !self.type_name.is_empty() {
            &self.type_name
        } else {
            self.field_type.as_str()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oneof {
    name: String,
    full_name: String,
    pub field_numbers: BTreeSet<i32>,
}

impl Oneof {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    name: String,
    full_name: String,
    pub number: i32,
    /// Additional names declared for the same number with `allow_alias`.
    pub aliases: Vec<String>,
}

impl EnumValue {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enum {
    name: String,
    full_name: String,
    pub values: BTreeMap<i32, EnumValue>,
}

impl Enum {
    fn build(scope: &str, proto: &EnumDescriptorProto) -> Self {
        let full_name = qualify(scope, proto.name());
        let mut values: BTreeMap<i32, EnumValue> = BTreeMap::new();
        for value in &proto.value {
            match values.get_mut(&value.number()) {
                Some(existing) => existing.aliases.push(value.name().to_string()),
                None => {
                    values.insert(
                        value.number(),
                        EnumValue {
                            name: value.name().to_string(),
                            full_name: qualify(&full_name, value.name()),
                            number: value.number(),
                            aliases: Vec::new(),
                        },
                    );
                }
            }
        }
        Self {
            name: proto.name().to_string(),
            full_name,
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    name: String,
    full_name: String,
    pub nested_enums: BTreeMap<String, Enum>,
    pub nested_messages: BTreeMap<String, Message>,
    pub fields: BTreeMap<String, Field>,
    pub oneofs: BTreeMap<String, Oneof>,
    field_numbers: BTreeMap<i32, String>,
}

impl Message {
    fn build(scope: &str, proto: &DescriptorProto) -> Self {
        let full_name = qualify(scope, proto.name());

        let oneof_names: Vec<String> = proto
            .oneof_decl
            .iter()
            .map(|oneof| oneof.name().to_string())
            .collect();
        let mut oneofs: BTreeMap<String, Oneof> = BTreeMap::new();
        let mut fields = BTreeMap::new();
        let mut field_numbers = BTreeMap::new();

        for field_proto in &proto.field {
            let field = build_field(&full_name, field_proto, &oneof_names);
            if let Some(oneof_name) = &field.oneof {
                oneofs
                    .entry(oneof_name.clone())
                    .or_insert_with(|| Oneof {
                        name: oneof_name.clone(),
                        full_name: qualify(&full_name, oneof_name),
                        field_numbers: BTreeSet::new(),
                    })
                    .field_numbers
                    .insert(field.number);
            }
            field_numbers.insert(field.number, field.name.clone());
            fields.insert(field.name.clone(), field);
        }

        let nested_enums = proto
            .enum_type
            .iter()
            .map(|e| (e.name().to_string(), Enum::build(&full_name, e)))
            .collect();
        let nested_messages = proto
            .nested_type
            .iter()
            .map(|m| (m.name().to_string(), Message::build(&full_name, m)))
            .collect();

        Self {
            name: proto.name().to_string(),
            full_name,
            nested_enums,
            nested_messages,
            fields,
            oneofs,
            field_numbers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn field_by_number(&self, number: i32) -> Option<&Field> {
        self.field_numbers
            .get(&number)
            .and_then(|name| self.fields.get(name))
    }

    /// Fields ordered by field number.
    pub fn fields_by_number(&self) -> impl Iterator<Item = &Field> {
        self.field_numbers
            .values()
            .filter_map(|name| self.fields.get(name))
    }
}

fn build_field(scope: &str, proto: &FieldDescriptorProto, oneof_names: &[String]) -> Field {
    let oneof = if proto.proto3_optional() {
        None
    } else {
        proto
            .oneof_index
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| oneof_names.get(index).cloned())
    };
    Field {
        name: proto.name().to_string(),
        full_name: qualify(scope, proto.name()),
        number: proto.number(),
        field_type: FieldType::from_proto(proto.r#type()),
        type_name: proto.type_name().trim_start_matches('.').to_string(),
        label: FieldLabel::from_proto(proto.label()),
        oneof,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    name: String,
    full_name: String,
    pub request_type: String,
    pub response_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    name: String,
    full_name: String,
    pub methods: BTreeMap<String, Method>,
}

impl Service {
    fn build(scope: &str, proto: &ServiceDescriptorProto) -> Self {
        let full_name = qualify(scope, proto.name());
        let methods = proto
            .method
            .iter()
            .map(|method| {
                (
                    method.name().to_string(),
                    Method {
                        name: method.name().to_string(),
                        full_name: qualify(&full_name, method.name()),
                        request_type: method.input_type().trim_start_matches('.').to_string(),
                        response_type: method.output_type().trim_start_matches('.').to_string(),
                        client_streaming: method.client_streaming(),
                        server_streaming: method.server_streaming(),
                    },
                )
            })
            .collect();
        Self {
            name: proto.name().to_string(),
            full_name,
            methods,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

/// One protobuf package and everything declared in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    name: String,
    /// Packages this package imports. Sorted, unique.
    pub dependency_names: Vec<String>,
    /// Packages that import this package. Sorted, unique.
    pub importer_names: Vec<String>,
    /// Descriptor file names that declared this package. Sorted.
    pub file_names: Vec<String>,
    pub enums: BTreeMap<String, Enum>,
    pub messages: BTreeMap<String, Message>,
    pub services: BTreeMap<String, Service>,
}

impl Package {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dependency_names: Vec::new(),
            importer_names: Vec::new(),
            file_names: Vec::new(),
            enums: BTreeMap::new(),
            messages: BTreeMap::new(),
            services: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same as [`name`](Self::name); packages are their own scope.
    pub fn full_name(&self) -> &str {
        &self.name
    }

    pub fn is_beta(&self) -> bool {
        is_beta_package(&self.name)
    }
}

/// Immutable package graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
    packages: Vec<Package>,
    index: BTreeMap<String, usize>,
}

impl PackageSet {
    /// Builds a package set from compiler descriptor output.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::FileMismatch`] when a file is seen twice in
    /// one package with different encodings, and
    /// [`DescriptorError::FilePackageConflict`] when the same file name
    /// appears under two packages.
    pub fn from_descriptor_sets(sets: &[FileDescriptorSet]) -> Result<Self, DescriptorError> {
        // file name -> (package, descriptor)
        let mut files: BTreeMap<String, (String, &FileDescriptorProto)> = BTreeMap::new();
        for set in sets {
            for file in &set.file {
                let Some(name) = file.name.as_deref() else {
                    return Err(DescriptorError::MissingFileName);
                };
                let package = file.package().to_string();
                match files.get(name) {
                    Some((existing_package, existing)) => {
                        if *existing_package != package {
                            return Err(DescriptorError::FilePackageConflict {
                                file: name.to_string(),
                                first: existing_package.clone(),
                                second: package,
                            });
                        }
                        if existing.encode_to_vec() != file.encode_to_vec() {
                            return Err(DescriptorError::FileMismatch {
                                file: name.to_string(),
                                package,
                            });
                        }
                    }
                    None => {
                        files.insert(name.to_string(), (package, file));
                    }
                }
            }
        }

        let package_names: BTreeSet<&str> =
            files.values().map(|(package, _)| package.as_str()).collect();
        let mut packages: Vec<Package> = package_names.iter().map(|n| Package::empty(n)).collect();
        let index: BTreeMap<String, usize> = packages
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();

        let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
        for (file_name, (package, file)) in &files {
            let importer = index[package.as_str()];
            for dep in &file.dependency {
                let Some((dep_package, _)) = files.get(dep) else {
                    debug!(file = %file_name, dependency = %dep, "dependency not present in descriptor sets");
                    continue;
                };
                let dep_index = index[dep_package.as_str()];
                if dep_index != importer {
                    edges.insert((importer, dep_index));
                }
            }
        }
        // Arena order is name order, so index order keeps edge lists sorted.
        for (importer, dep) in edges {
            let dep_name = packages[dep].name.clone();
            let importer_name = packages[importer].name.clone();
            packages[importer].dependency_names.push(dep_name);
            packages[dep].importer_names.push(importer_name);
        }

        for (file_name, (package, file)) in &files {
            let node = &mut packages[index[package.as_str()]];
            node.file_names.push(file_name.clone());
            for proto in &file.enum_type {
                node.enums
                    .insert(proto.name().to_string(), Enum::build(package, proto));
            }
            for proto in &file.message_type {
                node.messages
                    .insert(proto.name().to_string(), Message::build(package, proto));
            }
            for proto in &file.service {
                node.services
                    .insert(proto.name().to_string(), Service::build(package, proto));
            }
        }

        Ok(Self { packages, index })
    }

    /// Decodes and builds from serialized descriptor sets.
    pub fn from_encoded(sets: &[Vec<u8>]) -> Result<Self, DescriptorError> {
        let decoded = sets
            .iter()
            .map(|bytes| decode_descriptor_set(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_descriptor_sets(&decoded)
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.index.get(name).map(|&i| &self.packages[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Packages in name order.
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn package_names(&self) -> Vec<&str> {
        self.packages.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Every descriptor file name across all packages, sorted.
    pub fn descriptor_file_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .packages
            .iter()
            .flat_map(|p| p.file_names.iter().map(String::as_str))
            .collect();
        names.sort_unstable();
        names
    }

    /// Returns a copy without beta packages.
    ///
    /// Dependency names are kept as declared so that references to beta
    /// packages stay visible; importer edges from removed packages are
    /// dropped.
    pub fn without_beta(&self) -> Self {
        self.retain(|package| !package.is_beta())
    }

    fn retain(&self, keep: impl Fn(&Package) -> bool) -> Self {
        let packages: Vec<Package> = self.packages.iter().filter(|p| keep(p)).cloned().collect();
        let kept: BTreeSet<String> = packages.iter().map(|p| p.name.clone()).collect();
        let packages: Vec<Package> = packages
            .into_iter()
            .map(|mut p| {
                p.importer_names.retain(|name| kept.contains(name));
                p
            })
            .collect();
        let index = packages
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        Self { packages, index }
    }
}

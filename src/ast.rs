//! Abstract syntax tree for TPM structure and command tables.
//!
//! Nodes refer to each other by spec name; the [`Registry`](crate::registry::Registry) owns
//! them and resolves names. `spec_name` is fixed at creation, `name` is the target-language
//! form written by the adapter.

use crate::domain::Domain;
use std::cell::OnceCell;

/// Wire-encoding strategy of one structure field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MarshalType {
    /// Plain value or nested structure.
    #[default]
    Normal,
    /// Always marshaled with the single value of its domain.
    ConstantValue,
    /// Structure whose byte length precedes it (counterpart of `LengthOfStruct`).
    SizedStruct,
    /// Byte length of the following sized structure.
    LengthOfStruct,
    /// Element count of a variable-length array.
    ArrayCount,
    /// Array with a constant element count (`array_size`).
    FixedLengthArray,
    /// Array whose count is given by its `ArrayCount` counterpart.
    VariableLengthArray,
    /// Byte array whose length is implied by an algorithm selector.
    SpecialVariableLengthArray,
    /// Byte array filling the rest of the enclosing sized region.
    ImplicitLengthArray,
    /// Discriminant of a following union object.
    UnionSelector,
    /// Union value selected by its `UnionSelector` counterpart.
    UnionObject,
}

impl MarshalType {
    pub fn is_array(self) -> bool {
        matches!(
            self,
            MarshalType::FixedLengthArray
                | MarshalType::VariableLengthArray
                | MarshalType::SpecialVariableLengthArray
                | MarshalType::ImplicitLengthArray
        )
    }

    /// Tags carry no data of their own: they describe a sibling.
    pub fn is_tag(self) -> bool {
        matches!(
            self,
            MarshalType::ArrayCount | MarshalType::LengthOfStruct | MarshalType::UnionSelector
        )
    }
}

/// Unevaluated constant expression with a memoized value.
#[derive(Debug, Clone, Default)]
pub struct ConstExpr {
    pub expr: String,
    pub(crate) value: OnceCell<i64>,
    /// Target-language rendering (adapter output).
    pub target_expr: Option<String>,
    /// Constant symbols the adapter had to inline as literals.
    pub inlined: Vec<String>,
}

impl ConstExpr {
    pub fn new(expr: impl Into<String>) -> Self {
        ConstExpr {
            expr: expr.into(),
            ..Default::default()
        }
    }

    pub fn cached(&self) -> Option<i64> {
        self.value.get().copied()
    }
}

#[derive(Debug, Clone)]
pub struct NamedConstant {
    pub spec_name: String,
    pub name: String,
    /// Alternate name kept for generated-API compatibility.
    pub old_name: Option<String>,
    pub value: ConstExpr,
    pub comment: String,
    /// Spec name of the enum or bitfield owning this constant.
    pub owner: String,
}

impl NamedConstant {
    pub fn new(spec_name: &str, value: &str, owner: &str, comment: &str) -> Self {
        NamedConstant {
            spec_name: spec_name.to_string(),
            name: spec_name.to_string(),
            old_name: None,
            value: ConstExpr::new(value),
            comment: comment.to_string(),
            owner: owner.to_string(),
        }
    }
}

pub type ConstId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueType {
    pub size: usize,
    pub signed: bool,
    pub is_bool: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TypedefType {
    pub base: String,
    pub domain: Domain,
    /// Value accepted only where the type is used as nullable (`+TPM_ALG_NULL`).
    pub null_value: Option<String>,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnumType {
    pub underlying: String,
    pub members: Vec<ConstId>,
    /// The table gave no base type: a plain group of constants.
    pub constants_group: bool,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldMember {
    pub name: String,
    pub start_bit: u32,
    pub end_bit: u32,
    /// Enum restricting the values of a multi-bit member.
    pub enum_type: Option<String>,
    pub comment: String,
}

impl BitfieldMember {
    pub fn width(&self) -> u32 {
        self.end_bit - self.start_bit + 1
    }

    pub fn mask(&self) -> u64 {
        let ones = if self.width() >= 64 { u64::MAX } else { (1u64 << self.width()) - 1 };
        ones << self.start_bit
    }
}

#[derive(Debug, Clone, Default)]
pub struct BitfieldType {
    pub underlying: String,
    pub members: Vec<BitfieldMember>,
    /// Generated bit, mask, offset and length constants.
    pub constants: Vec<ConstId>,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StructField {
    pub name: String,
    pub type_name: String,
    pub marshal: MarshalType,
    /// Name of the counterpart field: the tag of a tagged field, or the tagged field of a tag.
    pub related: Option<String>,
    pub domain: Domain,
    /// Element count of a fixed-length array.
    pub array_size: Option<String>,
    pub nullable: bool,
    pub requires_auth: bool,
    pub is_handle: bool,
    /// Written `name=`: this field holds the byte size of the following structure.
    pub size_marker: bool,
    pub comment: String,
    /// Effective target-language type (adapter output).
    pub target_type: String,
}

impl StructField {
    pub fn new(name: &str, type_name: &str) -> Self {
        StructField {
            name: name.to_string(),
            type_name: type_name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructRole {
    Plain,
    CommandRequest { command: String, code: String },
    CommandResponse { command: String },
}

/// Parameter-encryption facts for a command whose first parameter is length-prefixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEncInfo {
    pub size_len: usize,
    pub val_len: usize,
}

/// Structures whose wire layout generic field emission cannot express.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialMarshal {
    /// Everything after `selector` is absent when the selector is `null_value`.
    NullAlgorithmSkip { selector: String, null_value: String },
}

#[derive(Debug, Clone)]
pub struct StructType {
    pub fields: Vec<StructField>,
    pub base: Option<String>,
    /// `(union, selector)` pairs of the unions this structure is a member of.
    pub containing_unions: Vec<(String, String)>,
    pub role: StructRole,
    pub num_handles: usize,
    pub num_auth_handles: usize,
    pub session_enc: Option<SessionEncInfo>,
    pub special_marshal: Option<SpecialMarshal>,
    pub error_code: Option<String>,
}

impl Default for StructType {
    fn default() -> Self {
        StructType {
            fields: Vec::new(),
            base: None,
            containing_unions: Vec::new(),
            role: StructRole::Plain,
            num_handles: 0,
            num_auth_handles: 0,
            session_enc: None,
            special_marshal: None,
            error_code: None,
        }
    }
}

impl StructType {
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// False for fields whose wire value is derived from a sibling or fixed by the domain.
    ///
    /// A selector is derived from its union object; the selector of a byte-array union
    /// (`SpecialVariableLengthArray`) has nothing to derive it from and stays data.
    pub fn is_data_field(&self, f: &StructField) -> bool {
        match f.marshal {
            MarshalType::ConstantValue | MarshalType::ArrayCount | MarshalType::LengthOfStruct => false,
            MarshalType::UnionSelector => !self.selects_union_object(f),
            _ => true,
        }
    }

    /// True when some union object of this structure is chosen by `selector`.
    pub fn selects_union_object(&self, selector: &StructField) -> bool {
        self.fields.iter().any(|o| {
            o.marshal == MarshalType::UnionObject && o.related.as_deref() == Some(selector.name.as_str())
        })
    }

    /// Fields that hold data in generated types.
    pub fn data_fields(&self) -> impl Iterator<Item = &StructField> {
        self.fields.iter().filter(|f| self.is_data_field(f))
    }

    pub fn handles(&self) -> impl Iterator<Item = &StructField> {
        self.fields.iter().filter(|f| f.is_handle)
    }

    pub fn params(&self) -> impl Iterator<Item = &StructField> {
        self.fields.iter().filter(|f| !f.is_handle)
    }

    pub fn is_request(&self) -> bool {
        matches!(self.role, StructRole::CommandRequest { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self.role, StructRole::CommandResponse { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionMember {
    pub name: String,
    pub type_name: String,
    /// Spec name of the selector constant.
    pub selector: String,
    pub array_size: Option<String>,
    pub comment: String,
    pub target_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct UnionType {
    pub members: Vec<UnionMember>,
    pub null_member: Option<usize>,
    pub error_code: Option<String>,
}

impl UnionType {
    pub fn member_for(&self, selector: &str) -> Option<&UnionMember> {
        self.members.iter().find(|m| m.selector == selector)
    }

    /// True when every non-null member is an inline array (e.g. digest unions).
    pub fn is_array_union(&self) -> bool {
        let mut any = false;
        for (i, m) in self.members.iter().enumerate() {
            if Some(i) == self.null_member {
                continue;
            }
            if m.array_size.is_none() {
                return false;
            }
            any = true;
        }
        any
    }
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Value(ValueType),
    Typedef(TypedefType),
    Enum(EnumType),
    Bitfield(BitfieldType),
    Struct(StructType),
    Union(UnionType),
}

impl TypeKind {
    pub fn label(&self) -> &'static str {
        match self {
            TypeKind::Value(_) => "value",
            TypeKind::Typedef(_) => "typedef",
            TypeKind::Enum(_) => "enum",
            TypeKind::Bitfield(_) => "bitfield",
            TypeKind::Struct(_) => "struct",
            TypeKind::Union(_) => "union",
        }
    }
}

/// One registered type.
#[derive(Debug, Clone)]
pub struct TpmType {
    pub spec_name: String,
    pub name: String,
    pub comment: String,
    /// False for auxiliary nodes that only drive derivations and are never emitted.
    pub implement: bool,
    pub kind: TypeKind,
}

impl TpmType {
    pub fn new(spec_name: &str, kind: TypeKind) -> Self {
        TpmType {
            spec_name: spec_name.to_string(),
            name: spec_name.to_string(),
            comment: String::new(),
            implement: true,
            kind,
        }
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match &self.kind {
            TypeKind::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct_mut(&mut self) -> Option<&mut StructType> {
        match &mut self.kind {
            TypeKind::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_union(&self) -> Option<&UnionType> {
        match &self.kind {
            TypeKind::Union(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_union_mut(&mut self) -> Option<&mut UnionType> {
        match &mut self.kind {
            TypeKind::Union(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType> {
        match &self.kind {
            TypeKind::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_typedef(&self) -> Option<&TypedefType> {
        match &self.kind {
            TypeKind::Typedef(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bitfield(&self) -> Option<&BitfieldType> {
        match &self.kind {
            TypeKind::Bitfield(b) => Some(b),
            _ => None,
        }
    }
}

/// Access to one node kind, for [`Registry::all_of`](crate::registry::Registry::all_of).
pub trait NodeKind {
    fn from_kind(kind: &TypeKind) -> Option<&Self>;
}

macro_rules! node_kind {
    ($ty:ty, $variant:ident) => {
        impl NodeKind for $ty {
            fn from_kind(kind: &TypeKind) -> Option<&Self> {
                match kind {
                    TypeKind::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

node_kind!(ValueType, Value);
node_kind!(TypedefType, Typedef);
node_kind!(EnumType, Enum);
node_kind!(BitfieldType, Bitfield);
node_kind!(StructType, Struct);
node_kind!(UnionType, Union);

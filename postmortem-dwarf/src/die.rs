//! The DIE record and its tag predicates.

use std::fmt;

/// A stable handle to a [`Die`] within its owning [`crate::CompilationUnit`],
/// namely the DIE's offset in the `.debug_info` section.
///
/// `dies_by_offset` is injective on this key: every DIE in a unit has
/// exactly one offset, and every offset names exactly one DIE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DieOffset(pub u64);

impl fmt::Display for DieOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// The debug-info tags the type graph distinguishes, replacing the source's
/// `tag == "DW_TAG_..."` string comparisons with an enumeration.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    /// `DW_TAG_pointer_type`
    Pointer,
    /// `DW_TAG_structure_type`
    Struct,
    /// `DW_TAG_union_type`
    Union,
    /// `DW_TAG_typedef`
    Typedef,
    /// `DW_TAG_volatile_type`
    Volatile,
    /// `DW_TAG_const_type`
    Const,
    /// `DW_TAG_array_type`
    Array,
    /// `DW_TAG_subrange_type`
    Subrange,
    /// `DW_TAG_subprogram`
    Subprogram,
    /// `DW_TAG_member`
    Member,
    /// `DW_TAG_variable`
    Variable,
    /// `DW_TAG_formal_parameter`
    FormalParameter,
    /// `DW_TAG_base_type`
    BaseType,
    /// `DW_TAG_compile_unit`
    CompileUnit,
    /// Any tag not named above.
    Other(u16),
}

impl Tag {
    pub(crate) fn from_gimli(tag: gimli::DwTag) -> Tag {
        use gimli::constants as c;
        match tag {
            c::DW_TAG_pointer_type => Tag::Pointer,
            c::DW_TAG_structure_type => Tag::Struct,
            c::DW_TAG_union_type => Tag::Union,
            c::DW_TAG_typedef => Tag::Typedef,
            c::DW_TAG_volatile_type => Tag::Volatile,
            c::DW_TAG_const_type => Tag::Const,
            c::DW_TAG_array_type => Tag::Array,
            c::DW_TAG_subrange_type => Tag::Subrange,
            c::DW_TAG_subprogram => Tag::Subprogram,
            c::DW_TAG_member => Tag::Member,
            c::DW_TAG_variable => Tag::Variable,
            c::DW_TAG_formal_parameter => Tag::FormalParameter,
            c::DW_TAG_base_type => Tag::BaseType,
            c::DW_TAG_compile_unit => Tag::CompileUnit,
            other => Tag::Other(other.0),
        }
    }
}

/// Where a location/frame-base expression's bytes come from: either inline
/// in the attribute (a `DW_FORM_exprloc` or similar block form) or as an
/// offset into the CU's location list (a `data`-form attribute value).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprSource {
    /// The expression bytes are given directly.
    Inline(Vec<u8>),
    /// The attribute is an offset into `.debug_loc`/`.debug_loclists`; the
    /// entry covering a given instruction pointer must be looked up at
    /// evaluation time.
    ListOffset(u64),
}

/// One debug-info entry: a node of the type graph.
///
/// See `spec.md` §3 for the field-by-field contract. A `Die` never holds a
/// borrowed reference to section bytes; `name`/`file_name` are owned and
/// expression sources are copied out of the section at build time so the
/// graph can outlive the raw DWARF bytes it was built from.
#[derive(Clone, Debug)]
pub struct Die {
    /// This DIE's own stable offset handle.
    pub offset: DieOffset,
    /// Debug-info tag.
    pub tag: Tag,
    /// `DW_AT_name`, if present.
    pub name: Option<String>,
    /// `DW_AT_type`, resolved to a sibling DIE in the same compilation unit.
    /// `None` if the attribute is absent (the spec's "0 if none" sentinel,
    /// represented idiomatically).
    pub base_type_offset: Option<DieOffset>,
    /// `DW_AT_byte_size`.
    pub size: Option<u64>,
    /// `DW_AT_bit_size`.
    pub bit_size: Option<u64>,
    /// `DW_AT_data_bit_offset` or `DW_AT_bit_offset`.
    pub bit_offset: Option<u64>,
    /// Decoded `DW_AT_data_member_location`, restricted to `DW_OP_plus_uconst`.
    pub byte_offset: Option<u64>,
    /// `DW_AT_upper_bound` on a `DW_TAG_subrange_type` child of an array.
    pub upper_bound: Option<u64>,
    /// `DW_AT_decl_file`, resolved to a file name via the CU's line program
    /// file table when available.
    pub file_name: Option<String>,
    /// `DW_AT_decl_line`.
    pub line_number: Option<u64>,
    /// `DW_AT_encoding` (`DW_ATE_*`) on a `DW_TAG_base_type`.
    pub encoding: Option<u64>,
    /// `DW_AT_location`, for `variable`/`formal_parameter` DIEs.
    pub location: Option<ExprSource>,
    /// `DW_AT_frame_base`, for `subprogram` DIEs.
    pub frame_base: Option<ExprSource>,
    /// `DW_AT_low_pc`/`DW_AT_high_pc`, for `subprogram` DIEs.
    pub pc_range: Option<(u64, u64)>,
    /// Parent DIE, `None` only for the CU's root `DW_TAG_compile_unit`.
    pub parent: Option<DieOffset>,
    /// Children in declaration order. Anonymous children are unnamed here;
    /// the DSO layer disambiguates them as `_1, _2, ...` on first navigation.
    pub children: Vec<DieOffset>,
}

impl Die {
    /// `DW_TAG_pointer_type`.
    pub fn is_pointer(&self) -> bool {
        matches!(self.tag, Tag::Pointer)
    }

    /// `DW_TAG_structure_type`.
    pub fn is_struct(&self) -> bool {
        matches!(self.tag, Tag::Struct)
    }

    /// `DW_TAG_union_type`.
    pub fn is_union(&self) -> bool {
        matches!(self.tag, Tag::Union)
    }

    /// `DW_TAG_typedef`.
    pub fn is_typedef(&self) -> bool {
        matches!(self.tag, Tag::Typedef)
    }

    /// `DW_TAG_volatile_type`.
    pub fn is_volatile(&self) -> bool {
        matches!(self.tag, Tag::Volatile)
    }

    /// `DW_TAG_const_type`.
    pub fn is_const(&self) -> bool {
        matches!(self.tag, Tag::Const)
    }

    /// `DW_TAG_array_type`.
    pub fn is_array(&self) -> bool {
        matches!(self.tag, Tag::Array)
    }

    /// `DW_TAG_subprogram`.
    pub fn is_subprogram(&self) -> bool {
        matches!(self.tag, Tag::Subprogram)
    }

    /// `DW_TAG_member`.
    pub fn is_member(&self) -> bool {
        matches!(self.tag, Tag::Member)
    }

    /// `DW_TAG_variable`.
    pub fn is_variable(&self) -> bool {
        matches!(self.tag, Tag::Variable)
    }

    /// struct, union, or typedef: types that forward field lookups.
    pub fn is_container(&self) -> bool {
        self.is_struct() || self.is_union() || self.is_typedef()
    }
}

//! Source-style pretty printing of a DIE's type, `spec.md` §4.5's
//! `describe_type`.

use crate::die::{Die, DieOffset, Tag};
use crate::unit::CompilationUnit;

const INDENT_UNIT: &str = "    ";

/// Renders `offset`'s type the way a C compiler would print it back: a
/// `struct`/`union` body with nested fields at `indent == 0`, otherwise just
/// the type name (qualifiers, pointer stars, array suffix).
///
/// Tabs in source names are expanded to 4 spaces, matching `spec.md`'s
/// wording exactly.
pub fn describe_type(cu: &CompilationUnit, offset: DieOffset, indent: usize) -> String {
    let tabs = INDENT_UNIT.repeat(indent);
    let Some(die) = cu.dies_by_offset.get(&offset) else {
        return format!("{tabs}<unknown>");
    };

    match die.tag {
        Tag::Struct | Tag::Union if indent == 0 => {
            let header = if die.is_struct() { "struct" } else { "union" };
            let name = die.name.as_deref().unwrap_or("");
            let mut out = format!("{tabs}{header} {name} {{\n");
            for child_offset in &die.children {
                if let Some(member) = cu.dies_by_offset.get(child_offset) {
                    if member.is_member() {
                        out.push_str(&describe_member(cu, member, indent + 1));
                        out.push('\n');
                    }
                }
            }
            out.push_str(&tabs);
            out.push('}');
            out
        }
        Tag::Typedef if indent == 0 => {
            let inner = die
                .base_type_offset
                .map(|base| type_name(cu, base))
                .unwrap_or_else(|| "void".to_string());
            format!(
                "{tabs}typedef {inner} {};",
                die.name.as_deref().unwrap_or("")
            )
        }
        Tag::Variable if indent == 0 => {
            let ty = die
                .base_type_offset
                .map(|base| type_name(cu, base))
                .unwrap_or_else(|| "void".to_string());
            format!("{tabs}{ty} {};", die.name.as_deref().unwrap_or(""))
        }
        _ => format!("{tabs}{}", type_name(cu, offset)),
    }
}

fn describe_member(cu: &CompilationUnit, member: &Die, indent: usize) -> String {
    let tabs = INDENT_UNIT.repeat(indent);
    let ty = member
        .base_type_offset
        .map(|base| type_name(cu, base))
        .unwrap_or_else(|| "void".to_string());
    let name = member.name.as_deref().unwrap_or("");

    let bitfield = match (member.bit_size, member.bit_offset) {
        (Some(size), Some(offset)) => format!(":{size}@{offset}"),
        (Some(size), None) => format!(":{size}@0"),
        _ => String::new(),
    };

    format!("{tabs}{ty} {name}{bitfield};")
}

/// The qualified, unindented name of a type: qualifiers, pointer stars and
/// array suffixes composed recursively through the base-type chain.
pub fn type_name(cu: &CompilationUnit, offset: DieOffset) -> String {
    let Some(die) = cu.dies_by_offset.get(&offset) else {
        return "<unknown>".to_string();
    };

    match die.tag {
        Tag::Pointer => {
            let inner = die
                .base_type_offset
                .map(|base| type_name(cu, base))
                .unwrap_or_else(|| "void".to_string());
            format!("{inner}*")
        }
        Tag::Const => {
            let inner = die
                .base_type_offset
                .map(|base| type_name(cu, base))
                .unwrap_or_default();
            format!("const {inner}")
        }
        Tag::Volatile => {
            let inner = die
                .base_type_offset
                .map(|base| type_name(cu, base))
                .unwrap_or_default();
            format!("volatile {inner}")
        }
        Tag::Array => {
            let inner = die
                .base_type_offset
                .map(|base| type_name(cu, base))
                .unwrap_or_else(|| "void".to_string());
            match array_element_count(cu, die) {
                Some(count) => format!("{inner}[{count}]"),
                None => format!("{inner}[]"),
            }
        }
        Tag::Struct => format!("struct {}", die.name.as_deref().unwrap_or("")),
        Tag::Union => format!("union {}", die.name.as_deref().unwrap_or("")),
        _ => die.name.clone().unwrap_or_else(|| "void".to_string()),
    }
}

/// An array type's element count is `upper_bound + 1` of its unique
/// anonymous `DW_TAG_subrange_type` child, per `spec.md` §4.5.
pub fn array_element_count(cu: &CompilationUnit, array_die: &Die) -> Option<u64> {
    array_die.children.iter().find_map(|child_offset| {
        let child = cu.dies_by_offset.get(child_offset)?;
        matches!(child.tag, Tag::Subrange)
            .then(|| child.upper_bound)
            .flatten()
            .map(|ub| ub + 1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::die::ExprSource;
    use std::collections::HashMap;

    fn cu_with(dies: Vec<Die>, root: DieOffset) -> CompilationUnit {
        let mut dies_by_offset = HashMap::new();
        for die in dies {
            dies_by_offset.insert(die.offset, die);
        }
        CompilationUnit {
            unit_offset: 0,
            root,
            dies_by_offset,
            dies_by_name: HashMap::new(),
            low_pc: 0,
            high_pc: 0,
            comp_dir: None,
            name: None,
            file_names: Vec::new(),
            include_dirs: Vec::new(),
            line_rows: Vec::new(),
        }
    }

    fn plain_die(offset: u64, tag: Tag) -> Die {
        Die {
            offset: DieOffset(offset),
            tag,
            name: None,
            base_type_offset: None,
            size: None,
            bit_size: None,
            bit_offset: None,
            byte_offset: None,
            upper_bound: None,
            file_name: None,
            line_number: None,
            encoding: None,
            location: None::<ExprSource>,
            frame_base: None,
            pc_range: None,
            parent: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn renders_struct_with_members_and_array_suffix() {
        let int_ty = {
            let mut d = plain_die(1, Tag::BaseType);
            d.name = Some("int".into());
            d
        };
        let subrange = {
            let mut d = plain_die(2, Tag::Subrange);
            d.upper_bound = Some(3);
            d
        };
        let array_ty = {
            let mut d = plain_die(3, Tag::Array);
            d.base_type_offset = Some(DieOffset(1));
            d.children = vec![DieOffset(2)];
            d
        };
        let member_v = {
            let mut d = plain_die(4, Tag::Member);
            d.name = Some("v".into());
            d.base_type_offset = Some(DieOffset(3));
            d.byte_offset = Some(0);
            d
        };
        let structure = {
            let mut d = plain_die(5, Tag::Struct);
            d.name = Some("S".into());
            d.children = vec![DieOffset(4)];
            d
        };

        let cu = cu_with(
            vec![int_ty, subrange, array_ty, member_v, structure],
            DieOffset(5),
        );

        let rendered = describe_type(&cu, DieOffset(5), 0);
        assert_eq!(rendered, "struct S {\n    int v[4];\n}");
    }
}

use serde_json::Value;

/// Locate a named field anywhere inside a nested JSON object.
///
/// Depth-first: an exact top-level key wins immediately; otherwise every
/// object-valued child is searched in mapping iteration order and the
/// first match is returned. Absence is a normal outcome — callers treat
/// it as "field not present in this event".
pub fn find_field<'a>(value: &'a Value, field_name: &str) -> Option<&'a Value> {
    let obj = value.as_object()?;

    if let Some(direct) = obj.get(field_name) {
        return Some(direct);
    }

    for child in obj.values() {
        if child.is_object() {
            if let Some(found) = find_field(child, field_name) {
                return Some(found);
            }
        }
    }

    None
}

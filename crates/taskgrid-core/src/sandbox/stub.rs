//! UI-binding stub generation (C1). Maps a `UiComponent`'s
//! `configuration.elements[]` to a strongly-typed source file that exposes
//! the submitted parameters to user code.

use serde_json::Value;

use crate::domain::UiComponent;

/// An element's declared type in `configuration.elements[]`, mapped to a
/// semantic kind the stub generator renders typed accessors for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    TextInput,
    Textarea,
    NumberInput,
    Checkbox,
    Dropdown,
    Radio,
    MultiSelect,
    DateInput,
    Slider,
    FileInput,
    Table,
    MapInput,
    Unknown,
}

impl ElementKind {
    fn from_str(s: &str) -> Self {
        match s {
            "text_input" => Self::TextInput,
            "textarea" => Self::Textarea,
            "number_input" => Self::NumberInput,
            "checkbox" => Self::Checkbox,
            "dropdown" => Self::Dropdown,
            "radio" => Self::Radio,
            "multi_select" => Self::MultiSelect,
            "date_input" => Self::DateInput,
            "slider" => Self::Slider,
            "file_input" => Self::FileInput,
            "table" => Self::Table,
            "map_input" => Self::MapInput,
            _ => Self::Unknown,
        }
    }

    /// Whether the rendered accessor's value type is numeric.
    fn is_numeric(&self) -> bool {
        matches!(self, Self::NumberInput | Self::Slider)
    }

    /// Whether the rendered accessor's value type is boolean.
    fn is_boolean(&self) -> bool {
        matches!(self, Self::Checkbox)
    }
}

struct StubElement {
    name: String,
    kind: ElementKind,
    required: bool,
    custom_name: Option<String>,
}

fn parse_elements(component: &UiComponent) -> Vec<StubElement> {
    component
        .elements()
        .into_iter()
        .filter_map(|el| {
            let name = el.get("name")?.as_str()?.to_string();
            let kind = el
                .get("type")
                .and_then(Value::as_str)
                .map(ElementKind::from_str)
                .unwrap_or(ElementKind::Unknown);
            let required = el.get("required").and_then(Value::as_bool).unwrap_or(false);
            let custom_name = el.get("customName").and_then(Value::as_str).map(str::to_string);
            Some(StubElement {
                name,
                kind,
                required,
                custom_name,
            })
        })
        .collect()
}

pub trait StubGenerator {
    /// File name the stub is written as, relative to the sandbox root.
    fn file_name(&self) -> &'static str;
    /// Renders the stub's full source text for the given component.
    fn render(&self, component: &UiComponent) -> String;
}

/// Renders a class whose properties mirror the component's elements, with
/// typed getters/setters, table-cell accessors (`customName` → `cellId`),
/// required-field validation, and a `from_json` entry point bound to
/// `sys.argv[1]`.
pub struct PythonStubGenerator;

impl StubGenerator for PythonStubGenerator {
    fn file_name(&self) -> &'static str {
        "_taskgrid_ui_binding.py"
    }

    fn render(&self, component: &UiComponent) -> String {
        let elements = parse_elements(component);
        let mut out = String::new();
        out.push_str("import json\nimport sys\n\n\n");
        out.push_str(&format!("class {}:\n", class_name(&component.name)));
        out.push_str("    def __init__(self, data):\n");
        out.push_str("        self._data = data or {}\n\n");

        for el in &elements {
            let py_type = python_type_hint(el.kind);
            out.push_str(&format!("    @property\n    def {}(self):\n", el.name));
            out.push_str(&format!("        # type: () -> {py_type}\n"));
            if matches!(el.kind, ElementKind::Table) {
                out.push_str(&format!(
                    "        return self._data.get({:?}, [])\n\n",
                    el.custom_name.as_deref().unwrap_or(&el.name)
                ));
            } else {
                out.push_str(&format!(
                    "        return self._data.get({:?})\n\n",
                    el.custom_name.as_deref().unwrap_or(&el.name)
                ));
            }
            out.push_str(&format!("    @{}.setter\n", el.name));
            out.push_str(&format!("    def {}(self, value):\n", el.name));
            out.push_str(&format!(
                "        self._data[{:?}] = value\n\n",
                el.custom_name.as_deref().unwrap_or(&el.name)
            ));
        }

        out.push_str("    def validate(self):\n");
        out.push_str("        missing = []\n");
        for el in elements.iter().filter(|e| e.required) {
            out.push_str(&format!(
                "        if self._data.get({:?}) in (None, \"\"):\n            missing.append({:?})\n",
                el.custom_name.as_deref().unwrap_or(&el.name),
                el.name
            ));
        }
        out.push_str("        if missing:\n            raise ValueError('missing required fields: ' + ', '.join(missing))\n\n");

        out.push_str("    @classmethod\n    def from_json(cls, raw=None):\n");
        out.push_str("        if raw is None:\n            raw = sys.argv[1] if len(sys.argv) > 1 else '{}'\n");
        out.push_str("        return cls(json.loads(raw))\n");
        out
    }
}

/// Renders a `[JsonPropertyName]`-annotated class with identical semantics
/// to `PythonStubGenerator`.
pub struct CsharpStubGenerator;

impl StubGenerator for CsharpStubGenerator {
    fn file_name(&self) -> &'static str {
        "TaskgridUiBinding.cs"
    }

    fn render(&self, component: &UiComponent) -> String {
        let elements = parse_elements(component);
        let class_name = class_name(&component.name);
        let mut out = String::new();
        out.push_str("using System;\nusing System.Collections.Generic;\nusing System.Text.Json.Serialization;\n\n");
        out.push_str(&format!("public class {class_name}\n{{\n"));
        for el in &elements {
            let cs_type = csharp_type(el.kind);
            let json_name = el.custom_name.as_deref().unwrap_or(&el.name);
            out.push_str(&format!("    [JsonPropertyName({json_name:?})]\n"));
            out.push_str(&format!("    public {cs_type} {} {{ get; set; }}\n\n", pascal_case(&el.name)));
        }
        out.push_str("    public void Validate()\n    {\n        var missing = new List<string>();\n");
        for el in elements.iter().filter(|e| e.required) {
            out.push_str(&format!(
                "        if ({} == null) missing.Add({:?});\n",
                pascal_case(&el.name),
                el.name
            ));
        }
        out.push_str("        if (missing.Count > 0) throw new InvalidOperationException(\"missing required fields: \" + string.Join(\", \", missing));\n    }\n");
        out.push_str(&format!(
            "\n    public static {class_name} FromJson(string raw) => System.Text.Json.JsonSerializer.Deserialize<{class_name}>(raw);\n"
        ));
        out.push_str("}\n");
        out
    }
}

/// Minimal shim for languages with no dedicated generator: surfaces the
/// raw JSON argument without typed accessors.
pub struct GenericStubGenerator;

impl StubGenerator for GenericStubGenerator {
    fn file_name(&self) -> &'static str {
        "taskgrid_ui_binding.txt"
    }

    fn render(&self, _component: &UiComponent) -> String {
        "raw JSON parameters are passed as the process's first argument\n".to_string()
    }
}

fn class_name(component_name: &str) -> String {
    let pascal = pascal_case(component_name);
    if pascal.is_empty() {
        "TaskgridUiBinding".to_string()
    } else {
        format!("{pascal}UiBinding")
    }
}

fn pascal_case(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn python_type_hint(kind: ElementKind) -> &'static str {
    if kind.is_numeric() {
        "float"
    } else if kind.is_boolean() {
        "bool"
    } else if matches!(kind, ElementKind::Table) {
        "list"
    } else if matches!(kind, ElementKind::MultiSelect) {
        "list"
    } else {
        "str"
    }
}

fn csharp_type(kind: ElementKind) -> &'static str {
    if kind.is_numeric() {
        "double"
    } else if kind.is_boolean() {
        "bool"
    } else if matches!(kind, ElementKind::Table | ElementKind::MultiSelect) {
        "List<object>"
    } else {
        "string"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UiComponentStatus;
    use crate::ids::{ProgramId, VersionId};
    use serde_json::json;

    fn sample_component() -> UiComponent {
        UiComponent {
            id: "c1".into(),
            program_id: ProgramId::new(),
            version_id: VersionId::new(),
            component_type: "form".into(),
            name: "add_form".into(),
            configuration: json!({
                "elements": [
                    {"name": "a", "type": "number_input", "required": true},
                    {"name": "b", "type": "number_input", "required": true},
                    {"name": "label", "type": "text_input", "required": false},
                ]
            }),
            schema: None,
            status: UiComponentStatus::Active,
            schema_version: 1,
            version: 0,
        }
    }

    #[test]
    fn python_stub_declares_required_and_optional_fields() {
        let component = sample_component();
        let source = PythonStubGenerator.render(&component);
        assert!(source.contains("class AddFormUiBinding"));
        assert!(source.contains("def a(self)"));
        assert!(source.contains("missing required fields"));
        assert!(source.contains("from_json"));
    }

    #[test]
    fn csharp_stub_declares_json_property_names() {
        let component = sample_component();
        let source = CsharpStubGenerator.render(&component);
        assert!(source.contains("[JsonPropertyName(\"a\")]"));
        assert!(source.contains("public double A"));
        assert!(source.contains("FromJson"));
    }

    #[test]
    fn generic_stub_is_a_plain_passthrough_note() {
        let component = sample_component();
        let source = GenericStubGenerator.render(&component);
        assert!(source.contains("raw JSON"));
    }

    #[test]
    fn table_element_maps_to_list_type() {
        let mut component = sample_component();
        component.configuration = json!({
            "elements": [
                {"name": "rows", "type": "table", "customName": "rowData"},
            ]
        });
        let source = PythonStubGenerator.render(&component);
        assert!(source.contains("self._data.get(\"rowData\", [])"));
    }
}

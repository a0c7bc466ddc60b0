#[cfg(test)]
mod tests {
    use crate::compiler::{compile, fallback_artifact, CompileOptions, Compiler};
    use crate::error::CompileErrorKind;
    use crate::functions::FunctionRegistry;
    use pretty_assertions::assert_eq;

    fn bare(source: &str) -> String {
        compile(source, &CompileOptions::new("test").bare()).unwrap()
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Output shape
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_text_interpolation() {
        assert_eq!(
            bare("<p>Hello {name}!</p>"),
            "return function (props = {}, children = {}) {\n    \
             $xtpl.echo(\"<p>Hello \",\n        \
             $xtpl.escape(props?.[\"name\"]),\n        \
             \"!</p>\");\n\
             };\n"
        );
    }

    #[test]
    fn test_registration_wrapper() {
        let code = compile("<p>Hi</p>", &CompileOptions::new("greeting")).unwrap();
        assert_eq!(
            code,
            "$xtpl.register(\"greeting\", function (props = {}, children = {}) {\n    \
             $xtpl.echo(\"<p>Hi</p>\");\n\
             });\n"
        );
    }

    #[test]
    fn test_text_literals_are_escaped() {
        let code = bare("<p>Fish &amp; chips &lt;3</p>");
        assert!(code.contains("\"<p>Fish &amp; chips &lt;3</p>\""));
    }

    #[test]
    fn test_unescape() {
        let code = bare("<div>{unescape(body)}</div>");
        assert!(code.contains("props?.[\"body\"]"));
        assert!(!code.contains("$xtpl.escape(props?.[\"body\"])"));

        let code = bare("<div><x-expr x-unescape>body</x-expr></div>");
        assert!(code.contains("props?.[\"body\"]"));
        assert!(!code.contains("$xtpl.escape"));
    }

    #[test]
    fn test_metadata_and_calls() {
        let code = bare("<p>{@title} {ucase(name)} {format(price, 2)}</p>");
        assert!(code.contains("$xtpl.escape($xtpl.meta(\"title\"))"));
        assert!(code.contains("$xtpl.escape(String(props?.[\"name\"] ?? \"\").toUpperCase())"));
        assert!(code.contains("$xtpl.call(\"format\", props?.[\"price\"], 2)"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Conditionals
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_if_else() {
        assert_eq!(
            bare("<p x-if=\"ok\">yes</p><p x-else>no</p>"),
            "return function (props = {}, children = {}) {\n    \
             // <p x-if=\"ok\">\n    \
             if (props?.[\"ok\"]) {\n        \
             $xtpl.echo(\"<p>yes</p>\");\n    \
             } else {\n        \
             $xtpl.echo(\"<p>no</p>\");\n    \
             }\n\
             };\n"
        );
    }

    #[test]
    fn test_else_across_whitespace() {
        let code = bare("<p x-if=\"ok\">yes</p>\n   <p x-else>no</p>");
        assert!(code.contains("} else {"));
        assert_eq!(code.matches("<p>no</p>").count(), 1);
    }

    #[test]
    fn test_nested_if_keeps_its_own_else() {
        let code = bare("<div x-if=\"a\"><p x-if=\"b\">B</p><p x-else>notB</p></div>");
        assert_eq!(code.matches("} else {").count(), 1);
        assert!(code.contains("if (props?.[\"b\"]) {"));
    }

    #[test]
    fn test_else_as_first_child() {
        let code = bare("<div x-if=\"ok\">yes<span x-else>no</span></div>");
        assert!(code.contains("$xtpl.echo(\"<div>yes</div>\");"));
        assert!(code.contains("} else {\n        $xtpl.echo(\"<span>no</span>\");\n    }"));
    }

    #[test]
    fn test_comment_replaces_tag_comment() {
        let code = bare("<!-- Greeting -->\n<p x-if=\"ok\">Hi</p>");
        assert!(code.contains("// Greeting\n"));
        assert!(!code.contains("// <p x-if"));
    }

    #[test]
    fn test_orphan_else_is_an_error() {
        let err = compile("<p x-else>no</p>", &CompileOptions::default()).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Structure);
        assert!(err.message.contains("x-else must follow"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Loops
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_each_with_key_and_value_aliases() {
        let code = bare("<ul x-each=\"people\" x-as=\"i person\"><li>{i}: {person.name}</li></ul>");
        let expected = "    // <ul x-each=\"people\" x-as=\"i person\">\n    \
                        $xtpl.echo(\"<ul>\");\n    \
                        {\n        \
                        const entries1 = $xtpl.entries(props?.[\"people\"]);\n        \
                        const count1 = entries1.length;\n        \
                        for (let index1 = 0; index1 < count1; index1++) {\n            \
                        const [i1, props1] = entries1[index1];\n            \
                        const first1 = index1 === 0;\n            \
                        const last1 = index1 === count1 - 1;\n            \
                        $xtpl.echo(\"<li>\",\n                \
                        $xtpl.escape(i1),\n                \
                        \": \",\n                \
                        $xtpl.escape(props1?.[\"name\"]),\n                \
                        \"</li>\");\n        \
                        }\n    \
                        }\n    \
                        $xtpl.echo(\"</ul>\");\n";
        assert!(code.contains(expected), "{}", code);
    }

    #[test]
    fn test_each_without_alias_rebinds_this() {
        let code = bare("<ul x-each=\"items\"><li>{this} {label}</li></ul>");
        assert!(code.contains("for (const [i1, props1] of $xtpl.entries(props?.[\"items\"])) {"));
        assert!(code.contains("$xtpl.escape(props1)"));
        assert!(code.contains("$xtpl.escape(props1?.[\"label\"])"));
    }

    #[test]
    fn test_loop_metadata() {
        let code = bare("<ol x-each=\"rows\" x-as=\"n row\"><li x-if=\"n.last\">{n.index}</li></ol>");
        assert!(code.contains("if (last1) {"));
        assert!(code.contains("$xtpl.escape(index1)"));
    }

    #[test]
    fn test_nested_loops_shadow_alias() {
        let code = bare(
            "<div x-each=\"groups\" x-as=\"g\"><p x-each=\"g.items\" x-as=\"g\">{g}</p></div>",
        );
        assert!(code.contains("for (const [i2, props2] of $xtpl.entries(props1?.[\"items\"])) {"));
        assert!(code.contains("$xtpl.escape(props2)"));
    }

    #[test]
    fn test_each_with_empty() {
        let code = bare("<ul x-each=\"items\"><li>{this}</li></ul><p x-empty>None</p>");
        assert!(code.contains("if ($xtpl.empty(props?.[\"items\"])) {"));
        assert!(code.contains("$xtpl.echo(\"<p>None</p>\");\n    } else {"));
        assert_eq!(code.matches("None").count(), 1);
    }

    #[test]
    fn test_invalid_as_clause() {
        let err = compile(
            "<ul x-each=\"items\" x-as=\"a b c\"><li></li></ul>",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Structure);
        assert_eq!(err.fragment, "a b c");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Context
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_with_alias() {
        let code = bare("<div x-with=\"user\" x-as=\"u\">{u.name} {name}</div>");
        assert!(code.contains("const props1 = props?.[\"user\"];"));
        assert!(code.contains("$xtpl.escape(props1?.[\"name\"])"));
        assert!(code.contains("$xtpl.escape(props?.[\"name\"])"));
    }

    #[test]
    fn test_with_rebinds_this() {
        let code = bare("<div x-with=\"user\">{name}</div>");
        assert!(code.contains("const props1 = props?.[\"user\"];"));
        assert!(code.contains("$xtpl.escape(props1?.[\"name\"])"));
    }

    #[test]
    fn test_expression_alias_spans_siblings() {
        let code = bare("<div><x-expr x-as=\"total\">price * qty</x-expr><p>{total}</p></div>");
        assert!(code.contains("const expr1 = props?.[\"price\"] * props?.[\"qty\"];"));
        assert!(code.contains("$xtpl.escape(expr1)"));
        // The alias block closes before the parent's end tag.
        let close = code.rfind("}\n    $xtpl.echo(\"</div>\");").unwrap();
        assert!(close > code.find("$xtpl.escape(expr1)").unwrap());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Markup
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_attributes() {
        let code = bare("<input type=\"checkbox\" checked=\"{done}\" disabled value=\"{v}\">");
        assert!(code.contains("\"<input type=\\\"checkbox\\\"\""));
        assert!(code.contains("$xtpl.attribute(\"checked\", props?.[\"done\"])"));
        assert!(code.contains("\" disabled value=\\\"\""));
        assert!(code.contains("$xtpl.escape(props?.[\"v\"])"));
        assert!(code.contains("\"\\\" />\""));
    }

    #[test]
    fn test_class_attribute_hook() {
        let code = bare("<div class=\"{classes}\"></div>");
        assert!(code.contains("$xtpl.escape($xtpl.attributeClass(props?.[\"classes\"]))"));
    }

    #[test]
    fn test_void_and_empty_elements() {
        let code = bare("<div><br><span></span></div>");
        assert!(code.contains("\"<div><br /><span></span></div>\""));
    }

    #[test]
    fn test_fragment_wrapper_is_not_emitted() {
        let code = bare("<x>a<b>b</b></x>");
        assert!(code.contains("\"a<b>b</b>\""));
    }

    #[test]
    fn test_dynamic_tag() {
        let code = bare("<x x-tag=\"level\">Title</x>");
        assert!(code.contains("const tag1 = props?.[\"level\"];"));
        assert_eq!(code.matches("if (tag1) {").count(), 2);
        assert!(code.contains("\"Title\""));
    }

    #[test]
    fn test_literal() {
        let code = bare("<code x-literal><b>{name}</b></code>");
        assert!(code.contains("\"<code><b>{name}</b></code>\""));
        assert!(!code.contains("$xtpl.escape"));
    }

    #[test]
    fn test_script_text_is_raw() {
        let code = bare("<script>if (a < b) { go(\"{x}\"); }</script>");
        assert!(code.contains("a < b"));
        assert!(!code.contains("$xtpl.escape"));
    }

    #[test]
    fn test_whitespace_between_blocks() {
        let code = bare("<div>\n    <p>a</p>\n    <p>b</p>\n</div>");
        assert!(code.contains("\"<div>\\n<p>a</p>\\n<p>b</p>\\n</div>\""));
    }

    #[test]
    fn test_full_document() {
        let code = bare("<!DOCTYPE html><html><head><title>{t}</title></head><body></body></html>");
        assert!(code.contains("<!DOCTYPE html><html><head><title>"));
        assert!(code.contains("$xtpl.escape(props?.[\"t\"])"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Components
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_component_include() {
        let code = bare("<card />");
        assert!(code.contains("$xtpl.write(\"card\", props, {});"));
    }

    #[test]
    fn test_include_props() {
        let code = bare("<card title=\"Hi\" count=\"{n}\" x-with=\"user\" />");
        assert!(code.contains(
            "$xtpl.write(\"card\", {...props?.[\"user\"], \"title\": \"Hi\", \"count\": props?.[\"n\"]}, {});"
        ));

        let code = bare("<card title=\"Hi\" />");
        assert!(code.contains("$xtpl.write(\"card\", {\"title\": \"Hi\"}, {});"));

        let code = bare("<card x-with=\"user\" />");
        assert!(code.contains("$xtpl.write(\"card\", props?.[\"user\"], {});"));
    }

    #[test]
    fn test_dynamic_include() {
        let code = bare("<div x-include=\"widget\" x-with=\"data\"></div>");
        assert!(code.contains("$xtpl.write(props?.[\"widget\"], props?.[\"data\"], {});"));
    }

    #[test]
    fn test_component_definition() {
        let code = compile(
            "<x x-component=\"Badge\"><b>{label}</b></x><badge label=\"New\" />",
            &CompileOptions::new("page"),
        )
        .unwrap();
        assert_eq!(
            code,
            "$xtpl.register(\"page\", function (props = {}, children = {}) {\n    \
             $xtpl.write(\"badge\", {\"label\": \"New\"}, {});\n\
             });\n\
             \n\
             $xtpl.register(\"badge\", function (props = {}, children = {}) {\n    \
             $xtpl.echo(\"<b>\",\n        \
             $xtpl.escape(props?.[\"label\"]),\n        \
             \"</b>\");\n\
             });\n"
        );
    }

    #[test]
    fn test_blocks_capture_loop_variables() {
        let code = bare(
            "<div x-each=\"items\"><card><h1 x-block=\"title\">{name}</h1>Body</card></div>",
        );
        assert!(code.contains("$xtpl.write(\"card\", props1, {"));
        assert!(code.contains("0: (function (props, props1, children) {"));
        assert!(code.contains("\"title\": (function (props, props1, children) {"));
        assert!(code.contains("})(props, props1, children)"));
        assert!(code.contains("$xtpl.escape(props1?.[\"name\"])"));
    }

    #[test]
    fn test_blocks_capture_loop_metadata() {
        let code = bare("<div x-each=\"items\" x-as=\"k v\"><card>{k.index}</card></div>");
        assert!(code.contains("(function (props, props1, i1, index1, first1, last1, count1, children) {"));
    }

    #[test]
    fn test_repeated_block_names_become_arrays() {
        let code = bare("<tabs><x x-block=\"tab\">A</x><x x-block=\"tab\">B</x></tabs>");
        assert!(code.contains("\"tab\": [\n"));
        assert_eq!(code.matches("(function (props, children) {").count(), 2);
    }

    #[test]
    fn test_block_outside_include_is_an_error() {
        let err = compile("<div><h1 x-block=\"title\">x</h1></div>", &CompileOptions::default())
            .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Structure);
        assert_eq!(
            err.message,
            "x-block elements must be direct children of a component include"
        );
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_expression_alias_in_block_is_an_error() {
        let err = compile(
            "<card><x-expr x-as=\"t\">a</x-expr></card>",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Structure);
    }

    #[test]
    fn test_component_definition_in_block_is_an_error() {
        let err = compile(
            "<card><div x-component=\"inner\"><p>x</p></div></card>",
            &CompileOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Structure);
        assert_eq!(err.message, "x-component cannot be used inside component child blocks");
    }

    #[test]
    fn test_children_slot() {
        let code = bare("<main x-children></main><aside x-children=\"Side\"></aside>");
        assert!(code.contains("if (children?.[0] !== undefined) {"));
        assert!(code.contains("$xtpl.block(children[0]);"));
        assert!(code.contains("if (children?.[\"side\"] !== undefined) {"));
        assert!(code.contains("\"</main><aside>\""));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Errors and configuration
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_syntax_error_reports_line_and_fragment() {
        let err = compile(
            "<div>\n<p>{a +}</p>\n</div>",
            &CompileOptions::new("page").with_path("page.html"),
        )
        .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Syntax);
        assert_eq!(err.fragment, "a +");
        assert_eq!(err.line, 2);
        assert_eq!(err.path, "page.html");
        assert_eq!(err.context_lines.len(), 3);
    }

    #[test]
    fn test_forbidden_construct_is_a_syntax_error() {
        let err = compile("<p>{count = 1}</p>", &CompileOptions::default()).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Syntax);
        assert!(err.message.contains("Assignments"));
    }

    #[test]
    fn test_trailing_tokens_are_a_syntax_error() {
        for source in ["<p>{a b}</p>", "<p>{price) * qty}</p>", "<p x-if=\"ok; drop\">x</p>"] {
            let err = compile(source, &CompileOptions::default()).unwrap_err();
            assert_eq!(err.kind, CompileErrorKind::Syntax, "{}", source);
        }
        let err = compile("<p>{a b}</p>", &CompileOptions::default()).unwrap_err();
        assert_eq!(err.source_position, Some(2));
        assert_eq!(err.source_length, Some(1));
    }

    #[test]
    fn test_unescape_only_wraps_a_whole_expression() {
        let code = bare("<p>{unescape(a) + unescape(b)}</p>");
        assert!(code.contains(
            "$xtpl.escape($xtpl.call(\"unescape\", props?.[\"a\"]) + $xtpl.call(\"unescape\", props?.[\"b\"]))"
        ));
        let code = bare("<p>{unescape(f(a))}</p>");
        assert!(code.contains("$xtpl.call(\"f\", props?.[\"a\"])"));
        assert!(!code.contains("$xtpl.escape("));
    }

    #[test]
    fn test_fallback_artifact() {
        let options = CompileOptions::new("page");
        let err = compile("<p>{a +}</p>", &options).unwrap_err();
        let code = fallback_artifact(&err, &options);
        assert!(code.starts_with("$xtpl.register(\"page\", function"));
        assert!(code.contains("xtpl-error"));
    }

    #[test]
    fn test_custom_function() {
        let mut compiler = Compiler::default();
        compiler.functions_mut().define(
            "money",
            |args| format!("formatMoney({})", args.join(", ")),
            |args| Ok(args.first().cloned().unwrap_or_default()),
        );
        let code = compiler
            .compile("<p>{money(price)}</p>", &CompileOptions::new("p").bare())
            .unwrap();
        assert!(code.contains("$xtpl.escape(formatMoney(props?.[\"price\"]))"));

        let plain = Compiler::with_functions(FunctionRegistry::new())
            .compile("<p>{count(items)}</p>", &CompileOptions::new("p").bare())
            .unwrap();
        assert!(plain.contains("$xtpl.call(\"count\", props?.[\"items\"])"));
    }

    #[test]
    fn test_compiler_is_shared_across_threads() {
        let compiler = Compiler::default();
        let options = CompileOptions::new("row").bare();
        let outputs: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|n| {
                    let compiler = &compiler;
                    let options = &options;
                    s.spawn(move || {
                        compiler
                            .compile(&format!("<span>{{cell{}}}</span>", n), options)
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (n, code) in outputs.iter().enumerate() {
            assert!(code.contains(&format!("props?.[\"cell{}\"]", n)));
        }
    }
}

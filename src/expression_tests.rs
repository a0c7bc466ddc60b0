#[cfg(test)]
mod tests {
    use crate::expression::{ExpressionCompiler, ExpressionError};
    use crate::functions::FunctionRegistry;
    use crate::scope::{Scope, ScopeFrame};

    fn root_scope() -> Scope {
        let mut scope = Scope::new();
        scope.push(ScopeFrame::new().bind("this", "props"));
        scope
    }

    fn compile_in(source: &str, scope: &Scope) -> Result<String, ExpressionError> {
        let functions = FunctionRegistry::with_builtins();
        ExpressionCompiler::new(&functions).compile(source, scope)
    }

    fn compile(source: &str) -> String {
        compile_in(source, &root_scope()).unwrap()
    }

    fn rejected(source: &str) -> String {
        compile_in(source, &root_scope()).unwrap_err().message
    }

    #[test]
    fn test_names_resolve_against_this() {
        assert_eq!(compile("name"), "props?.[\"name\"]");
        assert_eq!(compile("this"), "props");
        assert_eq!(compile("this.name"), "props?.[\"name\"]");
        assert_eq!(compile("user.address.city"), "props?.[\"user\"]?.[\"address\"]?.[\"city\"]");
        assert_eq!(compile("items[0]"), "props?.[\"items\"]?.[0]");
        assert_eq!(compile("map[key]"), "props?.[\"map\"]?.[props?.[\"key\"]]");
    }

    #[test]
    fn test_scoped_names() {
        let mut scope = root_scope();
        scope.push(
            ScopeFrame::new()
                .bind("person", "props1")
                .bind("i", "i1"),
        );
        assert_eq!(compile_in("person.name", &scope).unwrap(), "props1?.[\"name\"]");
        assert_eq!(compile_in("i", &scope).unwrap(), "i1");
        assert_eq!(compile_in("i.first", &scope).unwrap(), "first1");
        assert_eq!(compile_in("i.count", &scope).unwrap(), "count1");
        // Only loop keys carry metadata.
        assert_eq!(compile_in("person.index", &scope).unwrap(), "props1?.[\"index\"]");
    }

    #[test]
    fn test_metadata() {
        assert_eq!(compile("@title"), "$xtpl.meta(\"title\")");
        assert_eq!(compile("@user.name"), "$xtpl.meta(\"user\")?.[\"name\"]");
        assert_eq!(compile("'@home'"), "\"@home\"");
        assert_eq!(rejected("@user()"), "Metadata values cannot be called");
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(compile("a && !b"), "props?.[\"a\"] && !props?.[\"b\"]");
        assert_eq!(compile("typeof x"), "typeof props?.[\"x\"]");
        assert_eq!(compile("ok ? 'y' : \"n\""), "props?.[\"ok\"] ? \"y\" : \"n\"");
        assert_eq!(compile("(a + b) * 2"), "(props?.[\"a\"] + props?.[\"b\"]) * 2");
        assert_eq!(compile("-1.5"), "-1.5");
        assert_eq!(compile("a ?? null"), "props?.[\"a\"] ?? null");
        assert_eq!(compile("[1, a]"), "[1, props?.[\"a\"]]");
        assert_eq!(compile("{a: 1, 'b': c}"), "{\"a\": 1, \"b\": props?.[\"c\"]}");
    }

    #[test]
    fn test_calls() {
        assert_eq!(compile("count(items)"), "$xtpl.count(props?.[\"items\"])");
        assert_eq!(compile("format(a, 'x')"), "$xtpl.call(\"format\", props?.[\"a\"], \"x\")");
        assert_eq!(compile("name.trim()"), "props?.[\"name\"].trim()");
    }

    #[test]
    fn test_arrow_parameters_shadow_names() {
        assert_eq!(
            compile("items.filter(x => x.on)"),
            "props?.[\"items\"].filter((x$) => x$?.[\"on\"])"
        );
        assert_eq!(
            compile("items.map((x, n) => x + n + y)"),
            "props?.[\"items\"].map((x$, n$) => x$ + n$ + props?.[\"y\"])"
        );
    }

    #[test]
    fn test_forbidden_constructs() {
        assert_eq!(rejected("a = 1"), "Assignments are not allowed in template expressions");
        assert_eq!(
            rejected("a++"),
            "Increment and decrement operators are not allowed in template expressions"
        );
        assert_eq!(rejected("new Date()"), "Constructor calls are not allowed in template expressions");
        assert_eq!(
            rejected("items.map(function (x) { return x; })"),
            "Function expressions are not allowed in template expressions"
        );
        assert_eq!(rejected("`hi ${a}`"), "Template literals are not allowed in template expressions");
        assert_eq!(rejected("(a, b)"), "Comma sequences are not allowed in template expressions");
        assert_eq!(rejected("delete a.b"), "Delete operations are not allowed in template expressions");
        assert_eq!(
            rejected("async () => 1"),
            "Async arrow functions are not allowed in template expressions"
        );
        assert_eq!(
            rejected("() => { return 1; }"),
            "Arrow function bodies with statements are not allowed in template expressions"
        );
    }

    #[test]
    fn test_forbidden_construct_span() {
        let err = compile_in("a + (b = 2)", &root_scope()).unwrap_err();
        assert_eq!(err.offset, Some(5));
        assert_eq!(err.length, Some(5));
    }

    #[test]
    fn test_nested_signs_stay_separate() {
        assert_eq!(compile("- -n"), "- -props?.[\"n\"]");
        assert_eq!(compile("+-n"), "+ -props?.[\"n\"]");
        assert_eq!(compile("-+n"), "- +props?.[\"n\"]");
        assert_eq!(compile("-(-n)"), "-(-props?.[\"n\"])");
        assert_eq!(compile("!-n"), "!-props?.[\"n\"]");
    }

    #[test]
    fn test_trailing_tokens_are_rejected() {
        let err = compile_in("price) * qty", &root_scope()).unwrap_err();
        assert_eq!(err.offset, Some(5));
        assert_eq!(err.length, Some(1));

        let err = compile_in("ok; drop", &root_scope()).unwrap_err();
        assert_eq!(err.offset, Some(2));

        let err = compile_in("a  b ", &root_scope()).unwrap_err();
        assert_eq!(err.offset, Some(3));
        assert_eq!(err.message, "Unexpected \"b\" after expression");

        assert_eq!(compile("  a + b  "), "props?.[\"a\"] + props?.[\"b\"]");
    }

    #[test]
    fn test_parse_errors() {
        let err = compile_in("a +", &root_scope()).unwrap_err();
        assert!(!err.message.is_empty());

        let err = compile_in("", &root_scope()).unwrap_err();
        assert!(!err.message.is_empty());
    }
}

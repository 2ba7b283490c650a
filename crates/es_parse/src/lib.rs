use swc_common::comments::Comments;
use swc_common::sync::Lrc;
use swc_common::{FileName, SourceFile, SourceMap};
use swc_ecma_ast::{EsVersion, Module};
use swc_ecma_parser::{lexer::Lexer, StringInput, Syntax};
use swc_ecma_parser::{Capturing, EsSyntax, Parser};

/// Builds a lexer for an ECMAScript module source file. Byte offsets of the
/// produced spans are relative to the source map the file was created in.
pub fn create_lexer<'a>(fm: &'a SourceFile, comments: Option<&'a dyn Comments>) -> Lexer<'a> {
    Lexer::new(
        Syntax::Es(EsSyntax {
            ..Default::default()
        }),
        EsVersion::default(),
        StringInput::from(fm),
        comments,
    )
}

pub fn parse_es_src<TName, TBody>(name_str: TName, body: TBody) -> (Lrc<SourceMap>, Module)
where
    TName: Into<String>,
    TBody: ToString,
{
    parse_es_src_comments(name_str, body, None)
}

/// Parses a source string as an ES module, panicking on syntax errors.
/// Test helper; real inputs go through the bundle's loader, which reports
/// parse diagnostics instead of panicking.
pub fn parse_es_src_comments<TName, TBody>(
    name_str: TName,
    body: TBody,
    comments: Option<&dyn Comments>,
) -> (Lrc<SourceMap>, Module)
where
    TName: Into<String>,
    TBody: ToString,
{
    let cm = Lrc::<SourceMap>::default();
    let fname: Lrc<FileName> = Lrc::new(FileName::Custom(name_str.into()));
    let fm = cm.new_source_file(fname, body.to_string());

    let lexer: Lexer<'_> = create_lexer(&fm, comments);
    let capturing = Capturing::new(lexer);
    let mut parser: Parser<Capturing<Lexer<'_>>> = Parser::new_from(capturing);
    let module = parser.parse_module().unwrap();

    (cm, module)
}

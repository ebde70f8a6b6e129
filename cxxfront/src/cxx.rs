//! A C and C++ grammar for the parsing machine.
//!
//! The grammar is syntactic only: it does not know which names denote
//! types, so ambiguous statements such as `a * b;` are read as
//! declarations. Template argument lists close on a single `>` token; the
//! lexer splits `>>` and the shift and compound assignment operators are
//! reassembled through adjacency.
//!
//! Recovery alternatives sit at declaration, member and statement
//! boundaries and resynchronise after the next `;`.

use crate::error::GrammarError;
use crate::grammar::{
    Expr, Grammar, GrammarBuilder, Program, adjacent, bridge, compile, end_of_input,
    first_of, kind, next, next_not, recover, rule, till_new_line, value,
};
use crate::token::TokenKind;
use crate::{first_of, seq};

/// Rules of the C/C++ grammar
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum CxxRule {
    TranslationUnit,
    Declaration,
    EmptyDeclaration,
    NamespaceDefinition,
    LinkageSpecification,
    TemplateDeclaration,
    UsingDeclaration,
    StaticAssertDeclaration,
    AsmDeclaration,
    FunctionDefinition,
    FunctionTail,
    SimpleDeclaration,
    UntypedDeclaration,
    Attribute,
    DeclSpecifierSeq,
    SimpleSpecifier,
    BuiltinType,
    NamedType,
    ClassSpecifier,
    BaseClause,
    BaseSpecifier,
    MemberDeclaration,
    AccessSpecifier,
    EnumSpecifier,
    Enumerator,
    ElaboratedType,
    DecltypeSpecifier,
    QualifiedName,
    UnqualifiedId,
    OperatorFunctionId,
    TemplateArguments,
    TemplateArgument,
    TypeId,
    AbstractDeclarator,
    InitDeclaratorList,
    InitDeclarator,
    Declarator,
    PtrOperator,
    ParametersAndQualifiers,
    ParameterDeclaration,
    ArraySuffix,
    Initializer,
    BracedInitList,
    InitializerClause,
    Designation,
    CtorInitializer,
    MemInitializer,
    CompoundStatement,
    Statement,
    LabeledStatement,
    ExpressionStatement,
    DeclarationStatement,
    IfStatement,
    SwitchStatement,
    WhileStatement,
    DoStatement,
    ForStatement,
    InitStatement,
    Condition,
    ReturnStatement,
    JumpStatement,
    TryBlock,
    Handler,
    Expression,
    ExpressionList,
    AssignmentExpression,
    AssignmentOperator,
    ThrowExpression,
    ConditionalExpression,
    LogicalOrExpression,
    LogicalAndExpression,
    InclusiveOrExpression,
    ExclusiveOrExpression,
    AndExpression,
    EqualityExpression,
    RelationalExpression,
    RelationalOperator,
    ShiftExpression,
    ShiftOperator,
    AdditiveExpression,
    MultiplicativeExpression,
    CastExpression,
    UnaryExpression,
    NewExpression,
    DeleteExpression,
    PostfixExpression,
    PrimaryExpression,
    ParenthesizedExpression,
    CompoundLiteral,
    StatementExpression,
    LambdaExpression,
    CastOperatorExpression,
    IdExpression,
}

fn r(rule_id: CxxRule) -> Expr<CxxRule> {
    rule(rule_id)
}

fn id() -> Expr<CxxRule> {
    kind(TokenKind::Identifier)
}

fn words(list: &[&str]) -> Expr<CxxRule> {
    first_of(list.iter().map(|w| value(w)).collect())
}

fn parens() -> Expr<CxxRule> {
    bridge("(", ")")
}

/// Comma separated list of `item`
fn list_of(item: Expr<CxxRule>) -> Expr<CxxRule> {
    seq![item.clone(), seq![",", item].zero_or_more()]
}

/// `operand (operator operand)*`
fn binary(operator: Expr<CxxRule>, operand: CxxRule) -> Expr<CxxRule> {
    seq![r(operand), seq![operator, r(operand)].zero_or_more()]
}

const SIMPLE_SPECIFIERS: &[&str] = &[
    "const",
    "volatile",
    "static",
    "extern",
    "inline",
    "virtual",
    "explicit",
    "friend",
    "typedef",
    "constexpr",
    "consteval",
    "constinit",
    "mutable",
    "register",
    "thread_local",
    "_Thread_local",
    "_Noreturn",
    "_Atomic",
    "__inline",
    "__inline__",
    "__forceinline",
    "restrict",
    "__restrict",
    "__restrict__",
    "__extension__",
    "__volatile__",
    "__cdecl",
    "__stdcall",
    "__fastcall",
];

const BUILTIN_TYPES: &[&str] = &[
    "void", "bool", "_Bool", "char", "char8_t", "char16_t", "char32_t", "wchar_t", "short",
    "int", "long", "float", "double", "signed", "unsigned", "__signed__", "__int8", "__int16",
    "__int32", "__int64", "__int128", "_Complex", "auto",
];

const CV_QUALIFIERS: &[&str] = &[
    "const",
    "volatile",
    "restrict",
    "__restrict",
    "__restrict__",
    "_Nullable",
    "_Nonnull",
];

/// The C/C++ grammar
#[must_use]
pub fn grammar() -> Grammar<CxxRule> {
    use CxxRule::*;

    let mut b = GrammarBuilder::new();

    b.rule(TranslationUnit)
        .is(seq![r(Declaration).zero_or_more(), end_of_input()]);

    // Declarations

    b.rule(Declaration)
        .is(first_of![
            r(EmptyDeclaration),
            r(NamespaceDefinition),
            r(LinkageSpecification),
            r(TemplateDeclaration),
            r(UsingDeclaration),
            r(StaticAssertDeclaration),
            r(AsmDeclaration),
            r(FunctionDefinition),
            r(SimpleDeclaration),
            r(UntypedDeclaration),
            recover(";"),
        ])
        .skip();
    b.rule(EmptyDeclaration).is(value(";"));
    b.rule(NamespaceDefinition).is(seq![
        value("inline").optional(),
        "namespace",
        r(Attribute).zero_or_more(),
        seq![
            id(),
            seq!["::", value("inline").optional(), id()].zero_or_more()
        ]
        .optional(),
        first_of![
            seq!["{", r(Declaration).zero_or_more(), "}"],
            seq!["=", r(QualifiedName), ";"],
        ],
    ]);
    b.rule(LinkageSpecification).is(seq![
        "extern",
        kind(TokenKind::String),
        first_of![
            seq!["{", r(Declaration).zero_or_more(), "}"],
            r(Declaration),
        ],
    ]);
    b.rule(TemplateDeclaration).is(seq![
        value("export").optional(),
        value("extern").optional(),
        "template",
        bridge("<", ">").optional(),
        seq!["requires", r(PrimaryExpression)].optional(),
        r(Declaration),
    ]);
    b.rule(UsingDeclaration).is(first_of![
        seq!["using", "namespace", r(QualifiedName), ";"],
        seq!["using", id(), r(Attribute).zero_or_more(), "=", r(TypeId), ";"],
        seq![
            "using",
            list_of(seq![value("typename").optional(), r(QualifiedName)]),
            ";"
        ],
    ]);
    b.rule(StaticAssertDeclaration).is(seq![
        words(&["static_assert", "_Static_assert"]),
        parens(),
        ";"
    ]);
    b.rule(AsmDeclaration).is(seq![
        words(&["asm", "__asm", "__asm__"]),
        words(&["volatile", "__volatile__", "goto", "inline"]).zero_or_more(),
        first_of![parens(), bridge("{", "}"), till_new_line()],
        value(";").optional(),
    ]);

    b.rule(FunctionDefinition).is(first_of![
        seq![
            r(Attribute).zero_or_more(),
            r(DeclSpecifierSeq),
            r(Declarator),
            r(FunctionTail)
        ],
        seq![
            r(SimpleSpecifier).zero_or_more(),
            r(Declarator),
            r(FunctionTail)
        ],
    ]);
    b.rule(FunctionTail)
        .is(first_of![
            seq![r(CtorInitializer).optional(), r(CompoundStatement)],
            r(TryBlock),
            seq!["=", words(&["default", "delete"]), ";"],
        ])
        .skip();
    b.rule(SimpleDeclaration).is(seq![
        r(Attribute).zero_or_more(),
        r(DeclSpecifierSeq),
        r(InitDeclaratorList).optional(),
        ";"
    ]);
    b.rule(UntypedDeclaration).is(seq![
        r(SimpleSpecifier).zero_or_more(),
        r(InitDeclaratorList),
        ";"
    ]);

    b.rule(Attribute).is(first_of![
        seq![words(&["__attribute__", "__attribute"]), parens()],
        seq!["__declspec", parens()],
        seq![words(&["alignas", "_Alignas"]), parens()],
        seq![next(seq!["[", "["]), bridge("[", "]")],
    ]);

    // Specifiers. At most one named type per sequence.

    b.rule(DeclSpecifierSeq).is(seq![
        r(SimpleSpecifier).zero_or_more(),
        first_of![
            seq![
                r(BuiltinType).one_or_more(),
                first_of![r(SimpleSpecifier), r(BuiltinType)].zero_or_more()
            ],
            seq![r(NamedType), r(SimpleSpecifier).zero_or_more()],
        ],
    ]);
    b.rule(SimpleSpecifier)
        .is(first_of![r(Attribute), words(SIMPLE_SPECIFIERS)])
        .skip();
    b.rule(BuiltinType).is(words(BUILTIN_TYPES)).skip();
    b.rule(NamedType)
        .is(first_of![
            r(ClassSpecifier),
            r(EnumSpecifier),
            r(ElaboratedType),
            r(DecltypeSpecifier),
            r(QualifiedName),
        ])
        .skip();

    b.rule(ClassSpecifier).is(seq![
        words(&["class", "struct", "union"]),
        r(Attribute).zero_or_more(),
        r(QualifiedName).optional(),
        value("final").optional(),
        r(BaseClause).optional(),
        "{",
        r(MemberDeclaration).zero_or_more(),
        "}",
    ]);
    b.rule(BaseClause)
        .is(seq![":", list_of(r(BaseSpecifier))]);
    b.rule(BaseSpecifier).is(seq![
        words(&["virtual", "public", "protected", "private"]).zero_or_more(),
        r(QualifiedName),
        value("...").optional(),
    ]);
    b.rule(MemberDeclaration)
        .is(first_of![
            r(AccessSpecifier),
            r(EmptyDeclaration),
            r(TemplateDeclaration),
            r(UsingDeclaration),
            r(StaticAssertDeclaration),
            r(FunctionDefinition),
            r(SimpleDeclaration),
            r(UntypedDeclaration),
            recover(";"),
        ])
        .skip();
    b.rule(AccessSpecifier)
        .is(seq![words(&["public", "protected", "private"]), ":"]);

    b.rule(EnumSpecifier).is(seq![
        "enum",
        words(&["class", "struct"]).optional(),
        r(Attribute).zero_or_more(),
        r(QualifiedName).optional(),
        seq![":", r(DeclSpecifierSeq)].optional(),
        "{",
        seq![list_of(r(Enumerator)), value(",").optional()].optional(),
        "}",
    ]);
    b.rule(Enumerator).is(seq![
        id(),
        r(Attribute).zero_or_more(),
        seq!["=", r(ConditionalExpression)].optional(),
    ]);
    b.rule(ElaboratedType).is(seq![
        words(&["class", "struct", "union", "enum", "typename"]),
        r(Attribute).zero_or_more(),
        r(QualifiedName),
    ]);
    b.rule(DecltypeSpecifier).is(seq![
        words(&["decltype", "typeof", "__typeof__", "__typeof"]),
        parens()
    ]);

    // Names

    let qualified = seq![
        value("::").optional(),
        r(UnqualifiedId),
        seq!["::", value("template").optional(), r(UnqualifiedId)].zero_or_more(),
    ];
    b.rule(QualifiedName).is(qualified.clone());
    b.rule(IdExpression).is(qualified);
    b.rule(UnqualifiedId)
        .is(first_of![
            r(OperatorFunctionId),
            seq!["~", first_of![id(), r(DecltypeSpecifier)]],
            seq![id(), r(TemplateArguments).optional()],
        ])
        .skip();
    b.rule(OperatorFunctionId).is(seq![
        "operator",
        first_of![
            seq!["(", ")"],
            seq!["[", "]"],
            seq![words(&["new", "delete"]), seq!["[", "]"].optional()],
            seq![">", adjacent(), ">="],
            seq![">", adjacent(), ">"],
            seq![kind(TokenKind::String), id()],
            kind(TokenKind::Punctuator),
            seq![r(DeclSpecifierSeq), r(PtrOperator).zero_or_more()],
        ],
        r(TemplateArguments).optional(),
    ]);
    b.rule(TemplateArguments).is(seq![
        "<",
        list_of(seq![r(TemplateArgument), value("...").optional()]).optional(),
        ">",
    ]);
    b.rule(TemplateArgument).is(first_of![
        seq![r(TypeId), next(words(&[",", ">", "..."]))],
        r(AdditiveExpression),
    ]);

    b.rule(TypeId)
        .is(seq![r(DeclSpecifierSeq), r(AbstractDeclarator).optional()]);
    let abstract_suffix = first_of![
        seq!["(", r(AbstractDeclarator), ")"],
        r(ParametersAndQualifiers),
        r(ArraySuffix),
    ];
    b.rule(AbstractDeclarator).is(first_of![
        seq![
            r(PtrOperator).one_or_more(),
            abstract_suffix.clone().zero_or_more()
        ],
        abstract_suffix.one_or_more(),
    ]);

    // Declarators

    b.rule(InitDeclaratorList)
        .is(list_of(r(InitDeclarator)))
        .skip();
    b.rule(InitDeclarator).is(seq![
        r(Declarator),
        r(Attribute).zero_or_more(),
        seq![words(&["asm", "__asm", "__asm__"]), parens()].optional(),
        r(Initializer).optional(),
    ]);
    b.rule(Declarator).is(seq![
        r(PtrOperator).zero_or_more(),
        first_of![
            seq![value("...").optional(), r(IdExpression)],
            seq!["(", r(PtrOperator).one_or_more(), r(Declarator), ")"],
        ],
        first_of![r(ParametersAndQualifiers), r(ArraySuffix)].zero_or_more(),
    ]);
    b.rule(PtrOperator).is(first_of![
        seq!["*", words(CV_QUALIFIERS).zero_or_more()],
        "&&",
        "&",
        words(&["__cdecl", "__stdcall", "__fastcall"]),
    ]);
    b.rule(ParametersAndQualifiers).is(seq![
        "(",
        first_of![
            seq![
                list_of(r(ParameterDeclaration)),
                seq![",", "..."].optional()
            ],
            "...",
        ]
        .optional(),
        ")",
        first_of![
            "const",
            "volatile",
            "&&",
            "&",
            seq!["noexcept", parens().optional()],
            seq!["throw", parens()],
            "override",
            "final",
            seq!["->", r(TypeId)],
            r(Attribute),
        ]
        .zero_or_more(),
    ]);
    b.rule(ParameterDeclaration).is(seq![
        r(Attribute).zero_or_more(),
        r(DeclSpecifierSeq),
        first_of![r(Declarator), r(AbstractDeclarator)].optional(),
        seq!["=", r(InitializerClause)].optional(),
    ]);
    b.rule(ArraySuffix)
        .is(seq!["[", r(Expression).optional(), "]"]);

    b.rule(Initializer).is(first_of![
        seq!["=", r(InitializerClause)],
        r(BracedInitList),
        seq!["(", r(ExpressionList).optional(), ")"],
        seq![":", r(ConditionalExpression)],
    ]);
    b.rule(InitializerClause)
        .is(first_of![r(BracedInitList), r(AssignmentExpression)])
        .skip();
    let initializer_item = seq![
        r(Designation).optional(),
        r(InitializerClause),
        value("...").optional(),
    ];
    b.rule(BracedInitList).is(seq![
        "{",
        seq![list_of(initializer_item), value(",").optional()].optional(),
        "}",
    ]);
    b.rule(Designation).is(seq![
        first_of![
            seq![".", id()],
            seq!["[", r(ConditionalExpression), "]"],
        ]
        .one_or_more(),
        "=",
    ]);
    b.rule(CtorInitializer)
        .is(seq![":", list_of(r(MemInitializer))]);
    b.rule(MemInitializer).is(seq![
        r(QualifiedName),
        first_of![parens(), bridge("{", "}")],
        value("...").optional(),
    ]);

    // Statements

    b.rule(CompoundStatement)
        .is(seq!["{", r(Statement).zero_or_more(), "}"]);
    b.rule(Statement)
        .is(first_of![
            r(CompoundStatement),
            r(IfStatement),
            r(SwitchStatement),
            r(WhileStatement),
            r(DoStatement),
            r(ForStatement),
            r(ReturnStatement),
            r(JumpStatement),
            r(TryBlock),
            r(LabeledStatement),
            r(AsmDeclaration),
            r(DeclarationStatement),
            r(ExpressionStatement),
            recover(";"),
        ])
        .skip();
    b.rule(LabeledStatement).is(first_of![
        seq![
            "case",
            r(ConditionalExpression),
            seq!["...", r(ConditionalExpression)].optional(),
            ":",
            r(Statement).optional()
        ],
        seq!["default", ":", r(Statement).optional()],
        seq![id(), ":", r(Statement).optional()],
    ]);
    b.rule(ExpressionStatement)
        .is(seq![r(Expression).optional(), ";"]);
    b.rule(DeclarationStatement).is(first_of![
        r(UsingDeclaration),
        r(StaticAssertDeclaration),
        r(NamespaceDefinition),
        r(SimpleDeclaration),
    ]);
    b.rule(IfStatement).is(seq![
        "if",
        value("constexpr").optional(),
        "(",
        r(InitStatement).optional(),
        r(Condition),
        ")",
        r(Statement),
        seq!["else", r(Statement)].optional(),
    ]);
    b.rule(SwitchStatement).is(seq![
        "switch",
        "(",
        r(InitStatement).optional(),
        r(Condition),
        ")",
        r(Statement),
    ]);
    b.rule(WhileStatement)
        .is(seq!["while", "(", r(Condition), ")", r(Statement)]);
    b.rule(DoStatement).is(seq![
        "do",
        r(Statement),
        "while",
        "(",
        r(Expression),
        ")",
        ";"
    ]);
    b.rule(ForStatement).is(seq![
        "for",
        "(",
        first_of![
            seq![
                r(DeclSpecifierSeq),
                first_of![r(Declarator), bridge("[", "]")],
                ":",
                first_of![r(Expression), r(BracedInitList)],
            ],
            seq![
                first_of![r(InitStatement), ";"],
                r(Condition).optional(),
                ";",
                r(Expression).optional(),
            ],
        ],
        ")",
        r(Statement),
    ]);
    b.rule(InitStatement).is(first_of![
        r(SimpleDeclaration),
        seq![r(Expression), ";"],
    ]);
    b.rule(Condition).is(first_of![
        seq![
            r(DeclSpecifierSeq),
            r(Declarator),
            first_of![seq!["=", r(InitializerClause)], r(BracedInitList)],
        ],
        r(Expression),
    ]);
    b.rule(ReturnStatement).is(seq![
        words(&["return", "co_return"]),
        first_of![r(Expression), r(BracedInitList)].optional(),
        ";"
    ]);
    b.rule(JumpStatement).is(first_of![
        seq!["break", ";"],
        seq!["continue", ";"],
        seq!["goto", value("*").optional(), r(Expression), ";"],
    ]);
    b.rule(TryBlock).is(seq![
        "try",
        r(CtorInitializer).optional(),
        r(CompoundStatement),
        r(Handler).one_or_more(),
    ]);
    b.rule(Handler).is(seq![
        "catch",
        "(",
        first_of!["...", r(ParameterDeclaration)],
        ")",
        r(CompoundStatement),
    ]);

    // Expressions, loosest binding first

    b.rule(Expression)
        .is(list_of(r(AssignmentExpression)))
        .skip_if_one_child();
    b.rule(ExpressionList).is(list_of(seq![
        first_of![r(InitializerClause), r(TypeId)],
        value("...").optional(),
    ]));
    b.rule(AssignmentExpression)
        .is(first_of![
            r(ThrowExpression),
            seq![
                r(ConditionalExpression),
                seq![r(AssignmentOperator), r(InitializerClause)].optional()
            ],
        ])
        .skip_if_one_child();
    b.rule(AssignmentOperator)
        .is(first_of![
            "=",
            "*=",
            "/=",
            "%=",
            "+=",
            "-=",
            "<<=",
            seq![">", adjacent(), ">="],
            "&=",
            "^=",
            "|=",
        ])
        .skip();
    b.rule(ThrowExpression)
        .is(seq!["throw", r(AssignmentExpression).optional()]);
    b.rule(ConditionalExpression)
        .is(seq![
            r(LogicalOrExpression),
            seq![
                "?",
                r(Expression).optional(),
                ":",
                r(AssignmentExpression)
            ]
            .optional(),
        ])
        .skip_if_one_child();
    b.rule(LogicalOrExpression)
        .is(binary(value("||"), LogicalAndExpression))
        .skip_if_one_child();
    b.rule(LogicalAndExpression)
        .is(binary(value("&&"), InclusiveOrExpression))
        .skip_if_one_child();
    b.rule(InclusiveOrExpression)
        .is(binary(value("|"), ExclusiveOrExpression))
        .skip_if_one_child();
    b.rule(ExclusiveOrExpression)
        .is(binary(value("^"), AndExpression))
        .skip_if_one_child();
    b.rule(AndExpression)
        .is(binary(value("&"), EqualityExpression))
        .skip_if_one_child();
    b.rule(EqualityExpression)
        .is(binary(words(&["==", "!="]), RelationalExpression))
        .skip_if_one_child();
    b.rule(RelationalExpression)
        .is(binary(r(RelationalOperator), ShiftExpression))
        .skip_if_one_child();
    b.rule(RelationalOperator)
        .is(first_of![
            "<=>",
            "<=",
            ">=",
            "<",
            seq![">", next_not(seq![adjacent(), words(&[">", ">="])])],
        ])
        .skip();
    b.rule(ShiftExpression)
        .is(binary(r(ShiftOperator), AdditiveExpression))
        .skip_if_one_child();
    b.rule(ShiftOperator)
        .is(first_of!["<<", seq![">", adjacent(), ">"]])
        .skip();
    b.rule(AdditiveExpression)
        .is(binary(words(&["+", "-"]), MultiplicativeExpression))
        .skip_if_one_child();
    b.rule(MultiplicativeExpression)
        .is(binary(words(&["*", "/", "%", ".*", "->*"]), CastExpression))
        .skip_if_one_child();
    b.rule(CastExpression)
        .is(first_of![
            seq!["(", r(TypeId), ")", r(CastExpression)],
            r(UnaryExpression),
        ])
        .skip_if_one_child();
    b.rule(UnaryExpression)
        .is(first_of![
            seq![words(&["++", "--"]), r(CastExpression)],
            seq![words(&["*", "&", "+", "-", "!", "~"]), r(CastExpression)],
            seq![
                words(&["sizeof", "alignof", "_Alignof", "__alignof__"]),
                first_of![seq!["(", r(TypeId), ")"], r(UnaryExpression)]
            ],
            seq!["sizeof", "...", parens()],
            seq!["noexcept", parens()],
            seq!["co_await", r(CastExpression)],
            seq!["&&", id()],
            r(NewExpression),
            r(DeleteExpression),
            r(PostfixExpression),
        ])
        .skip_if_one_child();
    let new_type = first_of![
        seq!["(", r(TypeId), ")"],
        seq![
            r(DeclSpecifierSeq),
            r(PtrOperator).zero_or_more(),
            seq!["[", r(Expression), "]"].zero_or_more()
        ],
    ];
    b.rule(NewExpression).is(seq![
        value("::").optional(),
        "new",
        first_of![seq![parens(), new_type.clone()], new_type],
        first_of![parens(), r(BracedInitList)].optional(),
    ]);
    b.rule(DeleteExpression).is(seq![
        value("::").optional(),
        "delete",
        seq!["[", "]"].optional(),
        r(CastExpression),
    ]);
    b.rule(PostfixExpression)
        .is(seq![
            r(PrimaryExpression),
            first_of![
                seq!["[", first_of![r(Expression), r(BracedInitList)], "]"],
                seq!["(", r(ExpressionList).optional(), ")"],
                seq![
                    words(&[".", "->"]),
                    value("template").optional(),
                    r(IdExpression)
                ],
                "++",
                "--",
                r(BracedInitList),
            ]
            .zero_or_more(),
        ])
        .skip_if_one_child();
    b.rule(PrimaryExpression)
        .is(first_of![
            kind(TokenKind::Number),
            kind(TokenKind::String).one_or_more(),
            kind(TokenKind::Character),
            words(&["true", "false", "nullptr", "this"]),
            r(StatementExpression),
            r(CompoundLiteral),
            r(ParenthesizedExpression),
            r(LambdaExpression),
            r(CastOperatorExpression),
            seq![
                words(&["typeid", "_Generic", "__builtin_offsetof"]),
                parens()
            ],
            seq![r(BuiltinType).one_or_more(), first_of![parens(), r(BracedInitList)]],
            seq![r(DecltypeSpecifier), r(BracedInitList).optional()],
            r(IdExpression),
        ])
        .skip();
    b.rule(ParenthesizedExpression)
        .is(seq!["(", r(Expression), ")"]);
    b.rule(CompoundLiteral)
        .is(seq!["(", r(TypeId), ")", r(BracedInitList)]);
    b.rule(StatementExpression)
        .is(seq!["(", r(CompoundStatement), ")"]);
    b.rule(LambdaExpression).is(seq![
        bridge("[", "]"),
        bridge("<", ">").optional(),
        parens().optional(),
        first_of![
            "mutable",
            "constexpr",
            "consteval",
            seq!["noexcept", parens().optional()],
            r(Attribute),
            seq!["->", r(TypeId)],
        ]
        .zero_or_more(),
        r(CompoundStatement),
    ]);
    b.rule(CastOperatorExpression).is(seq![
        words(&[
            "static_cast",
            "dynamic_cast",
            "const_cast",
            "reinterpret_cast"
        ]),
        "<",
        r(TypeId),
        ">",
        "(",
        r(Expression),
        ")",
    ]);

    b.set_root(TranslationUnit);
    b.build()
}

/// Compile [`grammar`]
///
/// # Errors
/// Returns a `GrammarError` if the grammar is malformed.
pub fn compile_grammar() -> Result<Program<CxxRule>, GrammarError> {
    compile(&grammar())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Ast, NodeKind};
    use crate::lexer::lex;
    use crate::machine::{Machine, ParseOptions, ParseOutcome};

    fn parse(text: &str, options: ParseOptions) -> ParseOutcome<CxxRule> {
        let _ = env_logger::builder().is_test(true).try_init();
        let program = compile_grammar().unwrap();
        let tokens = lex(text);
        Machine::parse(&program, &tokens, &options).unwrap()
    }

    fn parse_clean(text: &str) -> Ast<CxxRule> {
        let outcome = parse(text, ParseOptions::strict());
        assert!(
            outcome.diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            outcome.diagnostics
        );
        outcome.ast.unwrap()
    }

    fn count(ast: &Ast<CxxRule>, rule_id: CxxRule) -> usize {
        ast.collect(NodeKind::Rule(rule_id)).len()
    }

    #[test]
    fn grammar_compiles() {
        let program = compile_grammar().unwrap();
        assert_eq!(program.rules()[program.root()].rule, CxxRule::TranslationUnit);
    }

    #[test]
    fn functions_and_structs() {
        let ast = parse_clean(
            "int add(int a, int b) { return a + b; }\n\
             struct Point { int x; int y; };\n\
             int main() { Point p = {1, 2}; return add(p.x, p.y); }\n",
        );
        assert_eq!(ast.kind(ast.root()), Some(NodeKind::Rule(CxxRule::TranslationUnit)));
        assert_eq!(count(&ast, CxxRule::FunctionDefinition), 2);
        assert_eq!(count(&ast, CxxRule::ClassSpecifier), 1);
        assert_eq!(count(&ast, CxxRule::ReturnStatement), 2);
        assert_eq!(count(&ast, CxxRule::BracedInitList), 1);
    }

    #[test]
    fn call_statements_are_expressions() {
        let ast = parse_clean("void f() { g(x); a = b; std::cout << x; }");
        assert_eq!(count(&ast, CxxRule::ExpressionStatement), 3);
        assert_eq!(count(&ast, CxxRule::DeclarationStatement), 0);
    }

    #[test]
    fn shift_and_template_closers() {
        let ast = parse_clean(
            "void f() {\n\
               std::vector<std::vector<int>> grid;\n\
               int x = 8 >> 1;\n\
               x >>= 1;\n\
               bool b = x > 1;\n\
             }",
        );
        assert_eq!(count(&ast, CxxRule::TemplateArguments), 2);
        assert_eq!(count(&ast, CxxRule::ShiftExpression), 1);
        assert_eq!(count(&ast, CxxRule::RelationalExpression), 1);
        assert_eq!(count(&ast, CxxRule::AssignmentExpression), 1);
    }

    #[test]
    fn classes_templates_and_namespaces() {
        let ast = parse_clean(
            "namespace geo {\n\
             template <typename T>\n\
             class Box : public Base {\n\
             public:\n\
                 explicit Box(T v) : value_(v) {}\n\
                 ~Box() = default;\n\
                 T get() const { return value_; }\n\
                 static int count;\n\
             private:\n\
                 T value_;\n\
             };\n\
             }\n",
        );
        assert_eq!(count(&ast, CxxRule::NamespaceDefinition), 1);
        assert_eq!(count(&ast, CxxRule::TemplateDeclaration), 1);
        assert_eq!(count(&ast, CxxRule::AccessSpecifier), 2);
        assert_eq!(count(&ast, CxxRule::FunctionDefinition), 3);
        assert_eq!(count(&ast, CxxRule::CtorInitializer), 1);
        assert_eq!(count(&ast, CxxRule::BaseClause), 1);
    }

    #[test]
    fn statements() {
        let ast = parse_clean(
            "int main() {\n\
               for (const auto& row : grid) { if (row.size() > 2) continue; }\n\
               for (int i = 0; i < n; ++i) total += i;\n\
               switch (x) { case 1: y = 2; break; default: break; }\n\
               while (x) --x;\n\
               do { x++; } while (x < 10);\n\
               try { run(); } catch (const std::exception& e) { } catch (...) { }\n\
               auto f = [&](int a) { return a * x; };\n\
               return f(x) ? 0 : 1;\n\
             }",
        );
        assert_eq!(count(&ast, CxxRule::ForStatement), 2);
        assert_eq!(count(&ast, CxxRule::IfStatement), 1);
        assert_eq!(count(&ast, CxxRule::SwitchStatement), 1);
        assert_eq!(count(&ast, CxxRule::LabeledStatement), 2);
        assert_eq!(count(&ast, CxxRule::WhileStatement), 1);
        assert_eq!(count(&ast, CxxRule::DoStatement), 1);
        assert_eq!(count(&ast, CxxRule::Handler), 2);
        assert_eq!(count(&ast, CxxRule::LambdaExpression), 1);
        assert_eq!(count(&ast, CxxRule::ConditionalExpression), 1);
    }

    #[test]
    fn c_constructs() {
        let ast = parse_clean(
            "typedef struct { int x; } point_t;\n\
             enum color { RED, GREEN = 2, };\n\
             static const char *names[] = { \"a\", \"b\" };\n\
             extern \"C\" { int puts(const char *s); }\n\
             int area(point_t *p) { return (int)sizeof(*p) + p->x; }\n\
             struct point_t q = { .x = 1 };\n",
        );
        assert_eq!(count(&ast, CxxRule::EnumSpecifier), 1);
        assert_eq!(count(&ast, CxxRule::Enumerator), 2);
        assert_eq!(count(&ast, CxxRule::LinkageSpecification), 1);
        assert_eq!(count(&ast, CxxRule::CastExpression), 1);
        assert_eq!(count(&ast, CxxRule::Designation), 1);
    }

    #[test]
    fn extensions_via_bridges() {
        let ast = parse_clean(
            "__declspec(dllexport) int f(void) __attribute__((noinline));\n\
             [[nodiscard]] int g();\n\
             void h() { __asm mov eax, 1\n return; }\n\
             static_assert(sizeof(int) == 4, \"int\");\n",
        );
        assert_eq!(count(&ast, CxxRule::Attribute), 3);
        assert_eq!(count(&ast, CxxRule::AsmDeclaration), 1);
        assert_eq!(count(&ast, CxxRule::StaticAssertDeclaration), 1);
    }

    #[test]
    fn strict_mode_reports_one_error() {
        let outcome = parse("int x = ;", ParseOptions::strict());
        assert!(outcome.ast.is_none());
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(
            outcome.diagnostics[0].message,
            "Parse error at line 1: unexpected ';'"
        );
    }

    #[test]
    fn recovery_at_declaration_boundary() {
        let outcome = parse("int a;\nint b = ;\nint c;", ParseOptions::recovering());
        let ast = outcome.ast.unwrap();
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(
            outcome.diagnostics[0].message,
            "Syntax error, recovered region at line 2"
        );
        assert_eq!(count(&ast, CxxRule::SimpleDeclaration), 2);
    }

    #[test]
    fn recovery_inside_function_body() {
        let outcome = parse(
            "void f() {\n  x = ;\n  y = 1;\n}\nint z;",
            ParseOptions::recovering(),
        );
        let ast = outcome.ast.unwrap();
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].line, Some(2));
        assert_eq!(count(&ast, CxxRule::FunctionDefinition), 1);
        assert_eq!(count(&ast, CxxRule::ExpressionStatement), 1);
    }
}

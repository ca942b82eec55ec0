pub mod quiz;

pub use quiz::{
    label_at, label_index, ExplanationSource, ParsingStats, Question, QuestionOption, QuestionType,
    Quiz, OPTION_LABELS,
};

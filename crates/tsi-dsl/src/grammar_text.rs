//! Builders for the default BNF grammar bodies consumed by the observation
//! and board pipelines. Character-class rules (`<digit>`, `<word_char>`,
//! `<path_char>`) are generated rather than hand-typed, since a strict BNF
//! whose only primitive is a literal terminal has no "any digit" token —
//! the classic technique is to spell the alphabet out as alternatives and
//! let `{<rule>}` repeat it, the same way a hand-rolled recursive-descent
//! number grammar is built from a `<digit>` production.

fn alternatives(chars: impl Iterator<Item = char>) -> String {
    chars.map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(" | ")
}

fn digit_rule() -> String {
    format!("<digit> ::= {} ;", alternatives('0'..='9'))
}

fn upper_rule() -> String {
    format!("<upper> ::= {} ;", alternatives('A'..='Z'))
}

/// Lowercase letters, digits, and underscore: enough for record-type and
/// identifier tokens (`kline`, `basic_1h`).
fn word_char_rule() -> String {
    let chars = ('a'..='z').chain('0'..='9').chain(std::iter::once('_'));
    format!("<word_char> ::= {} ;", alternatives(chars))
}

/// Everything `word_char` allows, plus path separators and a dot, for
/// file-path tokens.
fn path_char_rule() -> String {
    let chars = ('a'..='z')
        .chain('A'..='Z')
        .chain('0'..='9')
        .chain(['_', '.', '/', '-'].into_iter());
    format!("<path_char> ::= {} ;", alternatives(chars))
}

fn interval_rule() -> String {
    let intervals = ["1s", "1m", "3m", "5m", "15m", "30m", "1h", "4h", "1d", "1w"];
    let alts = intervals.iter().map(|i| format!("\"{i}\"")).collect::<Vec<_>>().join(" | ");
    format!("<interval> ::= {alts} ;")
}

fn boolean_rule() -> String {
    "<boolean> ::= \"true\" | \"false\" ;".to_string()
}

fn shared_rules() -> String {
    [digit_rule(), upper_rule(), word_char_rule(), path_char_rule(), interval_rule(), boolean_rule()].join("\n")
}

/// Default grammar for `observation_sources_dsl` (spec §4.4 source forms):
/// a repeated `instrument_form`, each naming an instrument, interval,
/// record type, normalization window, and source file path.
pub fn observation_sources_grammar_text() -> String {
    let shared = shared_rules();
    format!(
        r#"<instruction> ::= <instrument_table> ;
<instrument_table> ::= {{<instrument_form>}} ;
<instrument_form> ::= "instrument" <instrument> "interval" <interval> "record_type" <record_type> "norm_window" <norm_window> "source" <source> ;
<instrument> ::= {{<letter>}} ;
<letter> ::= <upper> | <digit> ;
<record_type> ::= {{<word_char>}} ;
<norm_window> ::= <number> ;
<number> ::= {{<digit>}} ;
<source> ::= <file_path> ;
<file_path> ::= {{<path_char>}} ;
{shared}"#
    )
}

/// Default grammar for `observation_channels_dsl` (spec §4.4 channel
/// forms): a repeated `input_form`, each naming an interval, record type,
/// activation flag, sequence lengths, and a channel weight.
pub fn observation_channels_grammar_text() -> String {
    let shared = shared_rules();
    format!(
        r#"<instruction> ::= <input_table> ;
<input_table> ::= {{<input_form>}} ;
<input_form> ::= "channel" "interval" <interval> "record_type" <record_type> "active" <active> "seq_length" <seq_length> "future_seq_length" <future_seq_length> "channel_weight" <channel_weight> ;
<record_type> ::= {{<word_char>}} ;
<active> ::= <boolean> ;
<seq_length> ::= <number> ;
<future_seq_length> ::= <number> ;
<channel_weight> ::= <number> "." <number> ;
<number> ::= {{<digit>}} ;
{shared}"#
    )
}

/// Default grammar for `board_dsl` (spec §4.4 board instruction): repeated
/// contract/wave declarations followed by repeated binds.
pub fn board_grammar_text() -> String {
    let shared = format!("{}\n{}\n{}", digit_rule(), upper_rule(), word_char_rule());
    format!(
        r#"<instruction> ::= <contract_table> <wave_table> <bind_table> ;
<contract_table> ::= {{<contract_decl>}} ;
<contract_decl> ::= "contract" <id> <path> ;
<wave_table> ::= {{<wave_decl>}} ;
<wave_decl> ::= "wave" <id> <path> ;
<bind_table> ::= {{<bind_decl>}} ;
<bind_decl> ::= "bind" <id> <contract_ref> <wave_ref> ;
<contract_ref> ::= <id> ;
<wave_ref> ::= <id> ;
<id> ::= {{<word_char>}} ;
<path> ::= {{<path_char>}} ;
<path_char> ::= <word_char> | "." | "/" | "-" ;
{shared}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_grammar_parses_and_validates() {
        let grammar = tsi_grammar::parse_grammar(&observation_sources_grammar_text()).unwrap();
        assert!(grammar.get_rule("<instruction>").is_some());
    }

    #[test]
    fn channels_grammar_parses_and_validates() {
        let grammar = tsi_grammar::parse_grammar(&observation_channels_grammar_text()).unwrap();
        assert!(grammar.get_rule("<input_table>").is_some());
    }

    #[test]
    fn board_grammar_parses_and_validates() {
        let grammar = tsi_grammar::parse_grammar(&board_grammar_text()).unwrap();
        assert!(grammar.get_rule("<bind_table>").is_some());
    }
}

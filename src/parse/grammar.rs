use winnow::ascii::dec_uint;
use winnow::combinator::{alt, repeat, separated};
use winnow::error::{ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;

/// Units accepted in duration literals such as `"1h30m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeUnit {
    Millis,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub(crate) fn millis(self) -> u64 {
        match self {
            TimeUnit::Millis => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60_000,
            TimeUnit::Hours => 3_600_000,
            TimeUnit::Days => 86_400_000,
        }
    }
}

// -- Durations --------------------------------------------------------------

fn time_unit(input: &mut &str) -> ModalResult<TimeUnit> {
    // "ms" must be tried before "m".
    alt((
        "ms".value(TimeUnit::Millis),
        "s".value(TimeUnit::Seconds),
        "m".value(TimeUnit::Minutes),
        "h".value(TimeUnit::Hours),
        "d".value(TimeUnit::Days),
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "time unit (ms, s, m, h, d)",
    )))
    .parse_next(input)
}

fn duration_segment(input: &mut &str) -> ModalResult<(u64, TimeUnit)> {
    (dec_uint::<_, u64, _>, time_unit).parse_next(input)
}

pub(crate) fn duration(input: &mut &str) -> ModalResult<Vec<(u64, TimeUnit)>> {
    repeat(1.., duration_segment).parse_next(input)
}

// -- Versions ---------------------------------------------------------------

pub(crate) fn version(input: &mut &str) -> ModalResult<Vec<u64>> {
    separated(1..=4, dec_uint::<_, u64, _>, '.')
        .context(StrContext::Expected(StrContextValue::Description(
            "dotted version number",
        )))
        .parse_next(input)
}

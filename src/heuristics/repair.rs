use super::lines::{self, Line};
use super::{ParsedRepair, PendingItem, RepairLineItem, is_positive};
use tracing::debug;

/// Parser state. Each variant carries the pending item, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Idle,
    /// A part description was seen but no price yet.
    AwaitingPartPrice(PendingItem),
    /// A part has a price but stays open for a quantity, part number or
    /// corrected price until the next description.
    PricedPart(PendingItem),
    /// A `Labor` line was seen; its price line closes it.
    AwaitingLaborPrice(PendingItem),
}

/// What happened to a pending item on a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Committed(RepairLineItem),
    Discarded(PendingItem),
}

impl State {
    fn pending_mut(&mut self) -> Option<&mut PendingItem> {
        match self {
            State::Idle => None,
            State::AwaitingPartPrice(p) | State::PricedPart(p) | State::AwaitingLaborPrice(p) => {
                Some(p)
            }
        }
    }

    /// Close out the pending item: priced items commit, unpriced ones drop.
    pub fn finish(self) -> Option<Outcome> {
        match self {
            State::Idle => None,
            State::AwaitingPartPrice(p) | State::PricedPart(p) | State::AwaitingLaborPrice(p) => {
                Some(match p.clone().finalize() {
                    Some(item) => Outcome::Committed(item),
                    None => Outcome::Discarded(p),
                })
            }
        }
    }

    /// Apply one classified line.
    pub fn step(mut self, line: Line<'_>) -> (State, Option<Outcome>) {
        match line {
            Line::Invoice | Line::Noise | Line::Other => (self, None),
            Line::Labor => (State::AwaitingLaborPrice(PendingItem::labor()), self.finish()),
            Line::Description(text) => (State::AwaitingPartPrice(PendingItem::part(text)), self.finish()),
            Line::Price(value) if is_positive(value) => match self {
                State::Idle => (State::Idle, None),
                State::AwaitingPartPrice(mut p) | State::PricedPart(mut p) => {
                    p.unit_price = value;
                    (State::PricedPart(p), None)
                }
                State::AwaitingLaborPrice(mut p) => {
                    p.unit_price = value;
                    (State::Idle, p.finalize().map(Outcome::Committed))
                }
            },
            Line::Quantity(value) if is_positive(value) => {
                if let Some(p) = self.pending_mut() {
                    p.quantity = value;
                }
                (self, None)
            }
            Line::PartNumber(number) => {
                if let Some(p) = self.pending_mut() {
                    p.part_number = Some(number.to_string());
                }
                (self, None)
            }
            Line::Price(_) | Line::Quantity(_) => (self, None),
        }
    }
}

fn record(outcome: Option<Outcome>, items: &mut Vec<RepairLineItem>) {
    match outcome {
        Some(Outcome::Committed(item)) => items.push(item),
        Some(Outcome::Discarded(p)) => {
            debug!(description = %p.description, kind = ?p.kind, "Dropped unpriced item");
        }
        None => {}
    }
}

pub fn parse(text: &str) -> Option<ParsedRepair> {
    if text.trim().is_empty() {
        return None;
    }

    let invoice_number = lines::invoice_number(text);
    let mut items = Vec::new();
    let mut state = State::Idle;

    for line in lines::split_lines(text) {
        let (next, outcome) = state.step(lines::classify(line));
        record(outcome, &mut items);
        state = next;
    }
    record(state.finish(), &mut items);

    if items.is_empty() && invoice_number.is_none() {
        return None;
    }
    Some(ParsedRepair::assemble(invoice_number, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::{ItemKind, round_cents};

    const SAMPLE: &str = "Invoice 54253\nAir Relief Assembly TR Series\npart #PEN273564Z, PAC-051-0319\t2\n$148.64\nLabor\n0.5\n$150.00";

    #[test]
    fn parses_part_and_labor_invoice() {
        let parsed = parse(SAMPLE).expect("sample should parse");
        assert_eq!(parsed.invoice_number.as_deref(), Some("54253"));
        assert_eq!(parsed.items.len(), 2);

        let part = &parsed.items[0];
        assert_eq!(part.kind, ItemKind::Part);
        assert_eq!(part.description, "Air Relief Assembly TR Series");
        assert_eq!(part.part_number.as_deref(), Some("PEN273564Z, PAC-051-0319"));
        assert_eq!(part.quantity, 2.0);
        assert_eq!(part.unit_price, 148.64);
        assert_eq!(part.extended_price, 297.28);

        let labor = &parsed.items[1];
        assert_eq!(labor.kind, ItemKind::Labor);
        assert_eq!(labor.description, "Labor");
        assert_eq!(labor.part_number, None);
        assert_eq!(labor.quantity, 0.5);
        assert_eq!(labor.unit_price, 150.0);
        assert_eq!(labor.extended_price, 75.0);

        assert_eq!(parsed.total_parts, 297.28);
        assert_eq!(parsed.total_labor, 75.0);
        assert_eq!(parsed.total_price, 372.28);
    }

    #[test]
    fn blank_input_has_no_result() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("  \n\t\r\n "), None);
    }

    #[test]
    fn invoice_number_alone_is_a_result() {
        let parsed = parse("Invoice 100").unwrap();
        assert_eq!(parsed.invoice_number.as_deref(), Some("100"));
        assert!(parsed.items.is_empty());
        assert_eq!(parsed.total_parts, 0.0);
        assert_eq!(parsed.total_labor, 0.0);
        assert_eq!(parsed.total_price, 0.0);
    }

    #[test]
    fn notes_without_prices_or_invoice_have_no_result() {
        assert_eq!(parse("Replaced the filter gasket\nCustomer happy"), None);
    }

    #[test]
    fn unpriced_part_is_dropped_before_next_description() {
        let parsed = parse("Pump Lid O-Ring\nFilter Cartridge\n$89.99").unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].description, "Filter Cartridge");
        assert_eq!(parsed.total_parts, 89.99);
    }

    #[test]
    fn unpriced_part_at_end_is_dropped() {
        let parsed = parse("Invoice 9\nChlorinator Cell\n$410.00\nSpare Valve").unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].description, "Chlorinator Cell");
    }

    #[test]
    fn labor_closes_on_its_price() {
        let parsed = parse("Labor\n$95.00").unwrap();
        assert_eq!(parsed.items.len(), 1);
        let labor = &parsed.items[0];
        assert_eq!(labor.kind, ItemKind::Labor);
        assert_eq!(labor.quantity, 1.0);
        assert_eq!(labor.unit_price, 95.0);
        assert_eq!(parsed.total_labor, 95.0);
        assert_eq!(parsed.total_parts, 0.0);
    }

    #[test]
    fn priced_part_takes_later_price_and_quantity() {
        let parsed = parse("Heater Igniter\n$100.00\n3\n$120.00\nLabor\n$80.00").unwrap();
        assert_eq!(parsed.items[0].quantity, 3.0);
        assert_eq!(parsed.items[0].unit_price, 120.0);
        assert_eq!(parsed.items[0].extended_price, 360.0);
        assert_eq!(parsed.total_price, 440.0);
    }

    #[test]
    fn header_rows_are_ignored() {
        let notes = "NAME\tQTY\tPRICE\tTAX\nSkimmer Basket\t1\t$24.50\n";
        let parsed = parse(notes).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].description, "Skimmer Basket");
        assert_eq!(parsed.items[0].unit_price, 24.5);
    }

    #[test]
    fn zero_price_does_not_commit() {
        assert_eq!(parse("Labor\n$0.00"), None);
        assert_eq!(parse("Drain Plug\n$0"), None);
    }

    #[test]
    fn thousands_separators_are_stripped() {
        let parsed = parse("Variable Speed Pump\n$1,249.00").unwrap();
        assert_eq!(parsed.items[0].unit_price, 1249.0);
    }

    #[test]
    fn part_number_applies_to_pending_labor() {
        let parsed = parse("Labor\npart #XYZ-1\n$60.00").unwrap();
        assert_eq!(parsed.items[0].kind, ItemKind::Labor);
        assert_eq!(parsed.items[0].part_number.as_deref(), Some("XYZ-1"));
    }

    #[test]
    fn part_number_without_pending_item_is_ignored() {
        let (next, outcome) = State::Idle.step(Line::PartNumber("ABC"));
        assert_eq!((next, outcome), (State::Idle, None));
    }

    #[test]
    fn description_discards_unpriced_part() {
        let state = State::AwaitingPartPrice(PendingItem::part("Lid"));
        let (next, outcome) = state.step(Line::Description("Basket"));
        assert_eq!(outcome, Some(Outcome::Discarded(PendingItem::part("Lid"))));
        assert_eq!(next, State::AwaitingPartPrice(PendingItem::part("Basket")));
    }

    #[test]
    fn description_commits_priced_part() {
        let mut lid = PendingItem::part("Lid");
        lid.unit_price = 12.0;
        let (next, outcome) = State::PricedPart(lid).step(Line::Description("Basket"));
        assert!(matches!(outcome, Some(Outcome::Committed(ref item)) if item.extended_price == 12.0));
        assert!(matches!(next, State::AwaitingPartPrice(_)));
    }

    #[test]
    fn idle_ignores_values() {
        let (next, outcome) = State::Idle.step(Line::Price(10.0));
        assert_eq!((next, outcome), (State::Idle, None));
        let (next, outcome) = State::Idle.step(Line::Quantity(2.0));
        assert_eq!((next, outcome), (State::Idle, None));
    }

    #[test]
    fn totals_stay_consistent_with_items() {
        let notes = "Valve\n3\n$0.35\nGasket\n7\n$1.15\nLabor\n0.25\n$99.99";
        let parsed = parse(notes).unwrap();
        for item in &parsed.items {
            assert_eq!(item.extended_price, round_cents(item.unit_price * item.quantity));
        }
        assert_eq!(
            parsed.total_price,
            round_cents(parsed.total_parts + parsed.total_labor)
        );
    }

    #[test]
    fn parsing_is_repeatable() {
        assert_eq!(parse(SAMPLE), parse(SAMPLE));
    }
}

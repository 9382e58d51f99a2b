use crate::domain::order::Order;
use crate::error::{PaymentError, Result};
use std::io::BufRead;

/// One non-blank line of a JSON-lines order file.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    /// 1-based line number in the source.
    pub line: usize,
    pub payload: Vec<u8>,
}

impl OrderLine {
    pub fn parse(&self) -> Result<Order> {
        Order::from_slice(&self.payload)
    }
}

/// Reads `order.created` payloads, one JSON document per line.
pub struct OrderReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> OrderReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily yields the raw non-blank lines. Undecodable lines are still
    /// returned; decoding is the consumer's job.
    pub fn lines(self) -> impl Iterator<Item = Result<OrderLine>> {
        self.source
            .lines()
            .enumerate()
            .filter_map(|(index, line)| match line {
                Ok(text) if text.trim().is_empty() => None,
                Ok(text) => Some(Ok(OrderLine {
                    line: index + 1,
                    payload: text.trim().as_bytes().to_vec(),
                })),
                Err(e) => Some(Err(PaymentError::from(e))),
            })
    }

    pub fn orders(self) -> impl Iterator<Item = Result<Order>> {
        self.lines().map(|line| line?.parse())
    }
}

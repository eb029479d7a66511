use crate::frame::PriceFrame;
use anyhow::{anyhow, Context, Result};
use log::info;

pub const LABEL_COLUMN: &str = "target";

/// Direction label: 1 when the future close is strictly above the current
/// close, 0 on equal or below.
pub fn classify(current: f64, future: f64) -> u8 {
    u8::from(future > current)
}

/// Appends the binary direction label for `target_asset` looking `horizon`
/// steps ahead, then drops the trailing rows that have no future value.
pub fn attach_direction_labels(
    frame: &mut PriceFrame,
    target_asset: &str,
    horizon: usize,
) -> Result<()> {
    if frame.len() <= horizon {
        return Err(anyhow!(
            "Not enough rows ({}) to look {} steps ahead",
            frame.len(),
            horizon
        ));
    }

    let closes = frame
        .column(&format!("{target_asset}_close"))
        .with_context(|| format!("Target asset {target_asset} is not part of the joined frame"))?;

    let labeled = closes.len() - horizon;
    let mut labels = Vec::with_capacity(closes.len());
    for t in 0..labeled {
        labels.push(f64::from(classify(closes[t], closes[t + horizon])));
    }
    // Placeholder tail, removed together with the rows below.
    labels.resize(closes.len(), 0.0);

    frame.add_column(LABEL_COLUMN, labels)?;
    frame.truncate_tail(horizon);
    info!(
        "Labeled {} rows against {} with a {}-step horizon",
        frame.len(),
        target_asset,
        horizon
    );
    Ok(())
}

/// Splits off the last `fraction` of timestamps as the out-of-time slice.
/// Returns (earlier rows, reserved tail). Either side being empty is an
/// error: the reserved slice starts at the timestamp
/// `floor(fraction * len)` rows from the end.
pub fn split_last_fraction(frame: PriceFrame, fraction: f64) -> Result<(PriceFrame, PriceFrame)> {
    if !(0.0..1.0).contains(&fraction) {
        return Err(anyhow!("Split fraction must be in [0, 1) (value: {fraction})"));
    }
    let len = frame.len();
    let reserved = (fraction * len as f64) as usize;
    if reserved == 0 || reserved == len {
        return Err(anyhow!(
            "Reserving {reserved} of {len} rows leaves a degenerate split"
        ));
    }

    let boundary = frame.timestamps()[len - reserved];
    let (head, tail) = frame.split_at_timestamp(boundary);
    info!(
        "Reserved {} rows from {} onward for validation ({} training rows)",
        tail.len(),
        boundary,
        head.len()
    );
    Ok((head, tail))
}

use indicatif::ProgressStyle;

/// Progress bar styles counting scanned blocks.
pub trait BlockProgress {
    /// Style labelled with `label`, showing blocks done, total and scan rate.
    /// The current block goes into the message.
    fn block_bar(label: &str) -> Self;
}

impl BlockProgress for ProgressStyle {
    fn block_bar(label: &str) -> Self {
        let template = format!(
            "{label:<31} {{wide_bar:40.cyan/blue}} {{pos:>6}}/{{len:<6}} blocks [{{elapsed_precise}}, {{per_sec}}] {{msg}}"
        );
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
    }
}

#[cfg(test)]
mod tests {
    use super::BlockProgress;
    use indicatif::{ProgressBar, ProgressStyle};

    #[test]
    fn template_is_valid() {
        let bar = ProgressBar::hidden();
        bar.set_style(ProgressStyle::block_bar("Scanning"));
        bar.set_length(4);
        bar.inc(1);
        assert_eq!(bar.position(), 1);
    }
}

use crate::models::EditingClaim;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BadgeSize {
    #[default]
    Sm,
    Md,
}

/// Render data for an "X is editing" badge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditingBadge {
    pub label: String,
    pub tooltip: String,
    pub classes: String,
}

const BASE_CLASSES: &str = "inline-flex items-center gap-1 rounded-full bg-yellow-100 dark:bg-yellow-900/40 \
text-yellow-800 dark:text-yellow-300 border border-yellow-300 dark:border-yellow-700 animate-pulse";

impl EditingBadge {
    /// Nothing to show without a claim.
    pub fn for_claim(claim: Option<&EditingClaim>, size: BadgeSize) -> Option<Self> {
        let claim = claim?;
        let name = &claim.user.display_name;
        let size_classes = match size {
            BadgeSize::Sm => "text-xs px-1.5 py-0.5",
            BadgeSize::Md => "text-sm px-2 py-1",
        };
        Some(Self {
            label: format!("{name} is editing"),
            tooltip: format!("{name} is currently editing this record"),
            classes: format!("{BASE_CLASSES} {size_classes}"),
        })
    }
}

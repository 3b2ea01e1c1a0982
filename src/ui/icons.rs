//! Shared status glyphs with plain-text fallbacks.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR] ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN] ");
pub static ARROW: Emoji<'_, '_> = Emoji("→", "->");
pub static PLAN: Emoji<'_, '_> = Emoji("📋 ", "");

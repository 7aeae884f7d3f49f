//! Prompt text and fixed report fragments for the advisor.
//!
//! Prompts and reports are Traditional Chinese; they are shown to the user
//! verbatim.

use super::advisor_service::{AnalysisMode, CompactData, TokenLedger, TradeParams};
use crate::domain::risk::round_trip_cost_percent;
use std::fmt::Write;

/// Digits grouped by thousands, rounded to an integer, with an explicit
/// sign when `signed`.
pub fn group_thousands(value: f64, signed: bool) -> String {
    let rounded = value.round();
    let digits = (rounded.abs() as u64).to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    } else if signed {
        out.push('+');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub const NEWS_SEARCH_SYSTEM: &str =
    "你是台股新聞搜尋助手。請搜尋並列出最重要的新聞標題和來源，用繁體中文。";

pub const NEWS_SUMMARY_SYSTEM: &str =
    "你是台股新聞分析專家。請將新聞整理成結構化格式，用繁體中文。";

pub fn news_search_prompt(symbol: &str) -> String {
    format!(
        "搜尋台股 {symbol} 最近 7 天的重要新聞，只列出：\n\
         1. 標題\n\
         2. 日期\n\
         3. 來源網站\n\
         格式：- [日期] 標題 (來源)\n\n\
         只列出最重要的 3-5 則，不要詳細內容。"
    )
}

pub fn news_summary_prompt(symbol: &str, raw_news: &str) -> String {
    format!(
        "請將以下 {symbol} 的新聞整理成：\n\n\
         {raw_news}\n\n\
         ---\n\
         輸出格式：\n\n\
         ## 📰 重要新聞 ({symbol})\n\n\
         ### [日期] 標題\n\
         - **類型**: 財報/併購/產業/其他\n\
         - **影響**: 正面/負面/中性\n\
         - **重點**: 一句話說明\n\n\
         ---\n\
         只保留最重要的 2-3 則，每則不超過 50 字。"
    )
}

pub fn system_prompt(mode: AnalysisMode, has_news: bool) -> String {
    match mode {
        AnalysisMode::Deep => "你是台股當沖分析專家。請進行深度分析，包含多時間框架技術分析、深入籌碼解讀、新聞影響評估、風險情境模擬。使用繁體中文，格式清晰。".to_string(),
        AnalysisMode::Quick => "你是台股當沖分析專家。請提供快速但準確的分析：當日適合度、關鍵價位、主要風險。使用繁體中文，簡潔明確。".to_string(),
        AnalysisMode::Comprehensive => format!(
            "你是台股當沖分析專家。請基於技術、籌碼{}數據，提供專業當沖建議。明確給出適合度、進出場價、部位大小、風險提示。使用繁體中文，保持客觀。",
            if has_news { "、新聞" } else { "" }
        ),
    }
}

pub fn user_prompt(mode: AnalysisMode, data: &CompactData, params: &TradeParams) -> String {
    match mode {
        AnalysisMode::Quick => quick_prompt(data, params),
        AnalysisMode::Comprehensive | AnalysisMode::Deep => comprehensive_prompt(data, params),
    }
}

fn level_prices(levels: &[crate::domain::PriceLevel]) -> String {
    levels
        .iter()
        .map(|l| format!("NT$ {:.2}", l.price))
        .collect::<Vec<_>>()
        .join(" / ")
}

fn quick_prompt(data: &CompactData, params: &TradeParams) -> String {
    let ind = &data.indicators;
    let mut p = format!(
        "## 快速當沖分析 - {}\n\n\
         **價格**: 昨收 {:.2} → 今開 {:.2} ({:+.2}%)\n\n\
         **技術**: RSI {:.0}, MACD {:.2}, KD {:.0}\n\
         MA5 {:.2} / MA20 {:.2}\n\n\
         **關鍵價位**: \n\
         壓力 {} | 支撐 {}\n",
        data.symbol,
        data.yesterday_close,
        data.today_open,
        data.gap_percent,
        ind.rsi,
        ind.macd,
        ind.kd_k,
        ind.ma5,
        ind.ma20,
        level_prices(&data.resistance),
        level_prices(&data.support),
    );

    if let Some(summary) = &data.institutional_summary {
        let _ = write!(p, "\n**籌碼**: {summary}");
    }
    if let Some(news) = &data.news_content {
        let _ = write!(p, "\n\n**新聞**: {news}");
    }

    let _ = write!(
        p,
        "\n\n**參數**: 資金 {}, 風險 {}%, 手續費 {}折\n\n\
         ---\n\
         請提供（簡潔版）：\n\
         1. 適合度: ✅適合 / ⚠️謹慎 / ❌不建議\n\
         2. 進場價: NT$ [價格]\n\
         3. 停利價: NT$ [價格] (+X%)\n\
         4. 停損價: NT$ [價格] (-X%)\n\
         5. 建議張數: [數字]張\n\
         6. 風險提示: [一句話]\n\n\
         請直接給數字，不要冗長說明。",
        group_thousands(params.capital, false),
        params.risk_percent,
        params.fee_discount,
    );
    p
}

fn rsi_zone(rsi: f64) -> &'static str {
    if rsi > 70.0 {
        "(超買區)"
    } else if rsi < 30.0 {
        "(超賣區)"
    } else {
        "(中性區)"
    }
}

fn volume_zone(ratio: f64) -> &'static str {
    if ratio > 2.0 {
        "(爆量)"
    } else if ratio > 1.5 {
        "(放量)"
    } else if ratio < 0.7 {
        "(縮量)"
    } else {
        "(正常)"
    }
}

fn comprehensive_prompt(data: &CompactData, params: &TradeParams) -> String {
    let ind = &data.indicators;
    let max_loss = (params.capital * params.risk_percent / 100.0).trunc();
    let cost = round_trip_cost_percent(params.fee_discount, params.tax_rate);
    let news_aspect = if data.has_news { "、新聞面" } else { "" };
    let capital = group_thousands(params.capital, false);

    let mut p = format!(
        "你是專業的台股當沖交易分析師，請針對 {symbol} 提供完整的當沖操作建議。\n\n\
         ## 📊 市場數據\n\n\
         ### 價格資訊\n\
         - 昨日收盤：NT$ {yc:.2}\n\
         - 今日開盤：NT$ {to:.2}\n\
         - 開盤缺口：{dir} {gap:.2}%\n\n\
         ### 技術指標\n\
         - **RSI(14)**: {rsi:.2} {rsi_zone}\n\
         - **MACD**: {macd:.4} | Signal: {sig:.4} | 差離值: {osc:.4}\n\
         - **KD 指標**: K={k:.2}, D={d:.2}\n\
         - **移動平均線**: MA5 {ma5:.2} / MA20 {ma20:.2} / MA60 {ma60:.2}\n\
         - **布林通道**: 上軌 {bbu:.2} / 中軌 {bbm:.2} / 下軌 {bbl:.2}\n\
         - **成交量比**: {vr:.2}x {vol_zone}\n\n\
         ### 關鍵價位\n",
        symbol = data.symbol,
        yc = data.yesterday_close,
        to = data.today_open,
        dir = data.gap_direction(),
        gap = data.gap_percent.abs(),
        rsi = ind.rsi,
        rsi_zone = rsi_zone(ind.rsi),
        macd = ind.macd,
        sig = ind.macd_signal,
        osc = ind.macd - ind.macd_signal,
        k = ind.kd_k,
        d = ind.kd_d,
        ma5 = ind.ma5,
        ma20 = ind.ma20,
        ma60 = ind.ma60,
        bbu = ind.bb_upper,
        bbm = ind.bb_middle,
        bbl = ind.bb_lower,
        vr = ind.volume_ratio,
        vol_zone = volume_zone(ind.volume_ratio),
    );

    if !data.resistance.is_empty() {
        p.push_str("**壓力位（賣出參考）**:\n");
        for (i, r) in data.resistance.iter().enumerate() {
            let _ = writeln!(p, "{}. NT$ {:.2} - {}", i + 1, r.price, r.label);
        }
    }
    if !data.support.is_empty() {
        p.push_str("\n**支撐位（買進參考）**:\n");
        for (i, s) in data.support.iter().enumerate() {
            let _ = writeln!(p, "{}. NT$ {:.2} - {}", i + 1, s.price, s.label);
        }
    }
    if let Some(summary) = &data.institutional_summary {
        let _ = write!(p, "\n### 三大法人籌碼\n{summary}\n");
    }
    if let Some(news) = &data.news_content {
        let _ = write!(p, "\n### 近期新聞\n{news}\n");
    }

    let _ = write!(
        p,
        "\n## 💼 交易參數設定\n\
         - **可用資金**: NT$ {capital}\n\
         - **單筆風險比例**: {risk}%\n\
         - **最大可承受損失**: NT$ {max_loss}\n\
         - **手續費折扣**: {fee} 折\n\
         - **證交稅率**: {tax}%\n\
         - **來回交易成本**: 約 {cost:.4}%\n\n\
         ---\n\n\
         ## 🎯 請你作為專業當沖分析師，提供以下完整的操作建議：\n\n\
         ### 1️⃣ 當沖適合度評估（必答）\n\n\
         請綜合以上所有數據（技術面、籌碼面{news_aspect}），明確判斷能不能購買，以及建議購買張數：\n\n\
         **適合度判斷**：\n\
         - ✅ **適合當沖** - 說明為什麼適合\n\
         - ⚠️ **謹慎操作** - 說明風險因素\n\
         - ❌ **不建議當沖** - 說明為什麼不適合\n\n\
         **信心指數**：[1-10分]\n\n\
         ---\n\n\
         ### 2️⃣ 進場策略\n\
         - **最佳進場價**: NT$ [具體價格]（理由與進場時機）\n\
         - **次佳進場價**: NT$ [具體價格]（備用方案）\n\
         - 根據資金 NT$ {capital} 和風險 {risk}%：建議買進張數、預計投入資金、保留資金、每張成本（含手續費）\n\n\
         ---\n\n\
         ### 3️⃣ 停利策略\n\n\
         | 停利點 | 價格 | 獲利% | 出場比例 | 預期獲利 |\n\
         |--------|------|-------|----------|----------|\n\
         | 第一停利 | NT$ [價格] | +[X]% | [X]% | NT$ [金額] |\n\
         | 第二停利 | NT$ [價格] | +[X]% | [X]% | NT$ [金額] |\n\
         | 終極停利 | NT$ [價格] | +[X]% | 100% | NT$ [金額] |\n\n\
         **總預期獲利**：NT$ [金額]（扣除交易成本後）\n\n\
         ---\n\n\
         ### 4️⃣ 停損策略\n\n\
         | 停損點 | 價格 | 虧損% | 停損金額 | 觸發條件 |\n\
         |--------|------|-------|----------|----------|\n\
         | 第一停損 | NT$ [價格] | -[X]% | NT$ [金額] | [條件] |\n\
         | 強制停損 | NT$ [價格] | -[X]% | NT$ [金額] | 無條件出場 |\n\n\
         **最大損失**: NT$ [金額]（不超過風險比例 {risk}%）\n\n\
         ---\n\n\
         ### 5️⃣ 盤中監控重點\n\
         - 3-5 個關鍵價位及其意義\n\
         - 加碼、減碼、出場的量能訊號\n\
         - 開盤（9:00-9:30）、早盤（9:30-11:00）、午盤（11:00-13:00）、尾盤（13:00-13:30）各自要注意什麼\n\n\
         ---\n\n\
         ### 6️⃣ 風險提示與應變方案\n\
         - 2-3 個最大風險\n\
         - 開盤不如預期、盤中出現意外、不適合當沖時的應變方案\n\n\
         ---\n\n\
         ### 7️⃣ 總結建議\n\
         1. **今天這支股票適不適合當沖？** [是/否，理由]\n\
         2. **如果要做，最重要的操作重點是什麼？** [一句話]\n\
         3. **最大的風險是什麼？** [一句話]\n\
         4. **你的信心指數是多少？** [1-10分]\n\n\
         ---\n\n\
         ## ⚠️ 重要提醒\n\n\
         1. **請給出具體的數字和價格**，不要模糊的說法\n\
         2. **停損點必須嚴格**，不可心存僥倖\n\
         3. **當沖交易風險極高**，請務必謹慎評估\n\
         4. **如果技術面、籌碼面{news_aspect}有矛盾**，請明確指出並建議謹慎或放棄\n\n\
         請現在開始你的完整分析，記得要給出**具體的數字、價格、張數、金額**！\n",
        risk = params.risk_percent,
        max_loss = group_thousands(max_loss, false),
        fee = params.fee_discount,
        tax = params.tax_rate,
    );
    p
}

pub fn report_header(mode: AnalysisMode, has_news: bool, model: &str) -> String {
    let components = if has_news {
        "技術面 + 籌碼面 + 新聞面"
    } else {
        "技術面 + 籌碼面"
    };
    format!(
        "## {}模式（{}）\n**使用模型**: {}\n\n",
        mode.title(),
        components,
        model
    )
}

pub fn token_footer(ledger: &TokenLedger) -> String {
    let t = &ledger.total;
    let mut out = format!(
        "---\n### 💰 Token 使用統計\n\n\
         **總計**:\n\
         - Prompt Tokens: {}\n\
         - Completion Tokens: {}\n\
         - Total Tokens: {}\n\n",
        group_thousands(t.prompt_tokens as f64, false),
        group_thousands(t.completion_tokens as f64, false),
        group_thousands(t.total_tokens as f64, false),
    );
    if !ledger.by_model.is_empty() {
        out.push_str("**按模型分類**:\n");
        for (model, usage) in &ledger.by_model {
            let _ = write!(
                out,
                "\n*{}* ({} 次調用):\n- Total: {} tokens\n",
                model,
                usage.calls,
                group_thousands(usage.total_tokens as f64, false)
            );
        }
    }
    out
}

pub fn fallback_news(symbol: &str) -> String {
    format!(
        "## ⚠️ 新聞搜尋暫時無法使用\n\n\
         目前無法獲取 {symbol} 的最新新聞。\n\n\
         ### 建議替代方案：\n\n\
         1. **手動查詢新聞**：\n\
         \x20  - [鉅亨網](https://news.cnyes.com/)\n\
         \x20  - [經濟日報](https://money.udn.com/)\n\
         \x20  - [工商時報](https://ctee.com.tw/)\n\
         \x20  - [Yahoo奇摩股市](https://tw.stock.yahoo.com/)\n\n\
         2. **技術面分析**：本系統的技術指標分析仍然可用\n\n\
         3. **稍後重試**：選擇強制更新後重新分析\n\n\
         ---\n\
         **提示**: 當沖交易建議以技術面為主，新聞面為輔\n"
    )
}

pub fn fallback_analysis(data: &CompactData) -> String {
    let ind = &data.indicators;
    format!(
        "## ⚠️ AI 分析暫時無法使用\n\n\
         ### 基本技術分析 ({})\n\n\
         #### 價格資訊\n\
         - 昨日收盤：NT$ {:.2}\n\
         - 今日開盤：NT$ {:.2}\n\
         - 開盤缺口：{:+.2}%\n\n\
         #### 技術指標參考\n\
         - RSI：{:.2}\n\
         - MA5：NT$ {:.2}\n\
         - MA20：NT$ {:.2}\n\
         - KD_K：{:.2}\n\n\
         ### 建議\n\
         1. 參考技術指標判斷趨勢\n\
         2. 注意支撐壓力位\n\
         3. 嚴格執行停損\n\
         4. 控制部位大小\n\n\
         ### 風險提示\n\
         ⚠️ 當沖風險高，請謹慎操作\n\
         ⚠️ 建議等待 AI 分析恢復後再進行交易\n\n\
         ---\n\
         **替代方案**：強制更新後重試，或稍後再試\n",
        data.symbol,
        data.yesterday_close,
        data.today_open,
        data.gap_percent,
        ind.rsi,
        ind.ma5,
        ind.ma20,
        ind.kd_k,
    )
}

pub const NO_API_KEY_MESSAGE: &str = "## ⚠️ AI 分析功能未啟用\n\n\
請設定 `PERPLEXITY_API_KEY` 環境變數以使用 AI 分析功能。\n\n\
### 設定方式：\n\
1. 前往 [Perplexity API](https://www.perplexity.ai/settings/api) 取得 API Key\n\
2. 在 `.env` 文件中添加：PERPLEXITY_API_KEY=pplx-your-api-key-here\n\
3. 重新啟動程式\n\n\
### 替代方案：\n\
1. 參考技術指標分析\n\
2. 參考支撐壓力位\n\
3. 參考籌碼數據\n\
4. 手動進行交易決策\n\n\
---\n\
**提示**: 您仍可以使用系統的技術分析功能進行交易決策\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(100_000.0, false), "100,000");
        assert_eq!(group_thousands(1234.4, true), "+1,234");
        assert_eq!(group_thousands(-2500.0, true), "-2,500");
        assert_eq!(group_thousands(0.0, true), "+0");
        assert_eq!(group_thousands(999.0, false), "999");
    }

    #[test]
    fn test_search_prompt_names_symbol() {
        let p = news_search_prompt("2330");
        assert!(p.starts_with("搜尋台股 2330 最近 7 天"));
        assert!(p.contains("3-5 則"));
    }

    #[test]
    fn test_comprehensive_system_prompt_mentions_news_only_with_news() {
        assert!(system_prompt(AnalysisMode::Comprehensive, true).contains("籌碼、新聞數據"));
        assert!(system_prompt(AnalysisMode::Comprehensive, false).contains("籌碼數據"));
    }

    #[test]
    fn test_header() {
        assert_eq!(
            report_header(AnalysisMode::Quick, false, "sonar"),
            "## ⚡ 快速分析模式（技術面 + 籌碼面）\n**使用模型**: sonar\n\n"
        );
    }

    #[test]
    fn test_fallback_news_links() {
        let s = fallback_news("2317");
        assert!(s.contains("2317"));
        assert!(s.contains("https://news.cnyes.com/"));
    }
}

use rust_decimal::{Decimal, RoundingStrategy};

use crate::reports::{BudgetUsage, MonthlyStats};

pub struct BudgetAlertMessage {}
pub struct MonthlyReportMessage {}

impl BudgetAlertMessage {
    pub fn subject(account_name: &str) -> String {
        format!("Budget Alert for: {account_name}")
    }

    pub fn generate(user_name: Option<&str>, usage: &BudgetUsage) -> String {
        let remaining = usage.budget_amount - usage.total_expenses;

        format!(
            "<html>
               <head>
                 <style>
                   body {{
                     font-family: Arial, sans-serif;
                     text-align: center;
                   }}
                 </style>
               </head>
             <body>
               <h1>Budget Alert</h1>
               <p>Hello {},</p>
               <p>You've used <b>{}%</b> of your monthly budget.</p>
               <table style=\"margin: 0 auto;\">
                 <tr><td>Budget Amount</td><td>${}</td></tr>
                 <tr><td>Spent So Far</td><td>${}</td></tr>
                 <tr><td>Remaining</td><td>${}</td></tr>
               </table>
             </body>
             </html>",
            escape_html(user_name.unwrap_or("there")),
            format_percent(usage.percent_used),
            format_amount(usage.budget_amount),
            format_amount(usage.total_expenses),
            format_amount(remaining),
        )
    }
}

impl MonthlyReportMessage {
    pub fn subject(month_name: &str) -> String {
        format!("Your Monthly Financial Report - {month_name}")
    }

    pub fn generate(
        user_name: Option<&str>,
        month_name: &str,
        stats: &MonthlyStats,
        insights: &[String],
    ) -> String {
        let categories = stats
            .by_category
            .iter()
            .map(|(category, amount)| {
                format!(
                    "<tr><td>{}</td><td>${}</td></tr>",
                    escape_html(category),
                    format_amount(*amount),
                )
            })
            .collect::<String>();

        let insights = insights
            .iter()
            .map(|insight| format!("<li>{}</li>", escape_html(insight)))
            .collect::<String>();

        format!(
            "<html>
               <head>
                 <style>
                   body {{
                     font-family: Arial, sans-serif;
                     text-align: center;
                   }}
                 </style>
               </head>
             <body>
               <h1>Monthly Financial Report</h1>
               <p>Hello {},</p>
               <p>Here's your financial summary for {}:</p>
               <table style=\"margin: 0 auto;\">
                 <tr><td>Total Income</td><td>${}</td></tr>
                 <tr><td>Total Expenses</td><td>${}</td></tr>
                 <tr><td>Net</td><td>${}</td></tr>
               </table>
               <h2>Expenses by Category</h2>
               <table style=\"margin: 0 auto;\">{}</table>
               <h2>Insights</h2>
               <ul style=\"text-align: left;\">{}</ul>
             </body>
             </html>",
            escape_html(user_name.unwrap_or("there")),
            escape_html(month_name),
            format_amount(stats.total_income),
            format_amount(stats.total_expenses),
            format_amount(stats.net_income()),
            categories,
            insights,
        )
    }
}

fn format_amount(amount: Decimal) -> String {
    format!(
        "{:.2}",
        amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    )
}

fn format_percent(percent: Decimal) -> String {
    format!(
        "{:.1}",
        percent.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }

    escaped
}

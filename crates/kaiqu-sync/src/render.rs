//! Markdown table and tab-separated line documents.

use chrono::{DateTime, Local};
use kaiqu_core::{OpenTime, Record};

const TABLE_HEADER: [&str; 7] = [
    "服务器名称",
    "服务器链接",
    "服务器类型",
    "开区时间",
    "最低消费",
    "描述",
    "特色",
];

fn table_time(open_time: &OpenTime) -> String {
    match open_time {
        OpenTime::Scheduled(ts) => DateTime::from_timestamp(*ts, 0)
            .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| ts.to_string()),
        OpenTime::Sentinel(label) => label.clone(),
    }
}

fn fields(record: &Record, time: String) -> [String; 7] {
    [
        record.name().to_string(),
        record.url().to_string(),
        record.category().to_string(),
        time,
        record.min_spend().to_string(),
        record.description().to_string(),
        record.features().to_string(),
    ]
}

fn table_row(cells: &[impl AsRef<str>]) -> String {
    let inner: Vec<&str> = cells.iter().map(AsRef::as_ref).collect();
    format!("| {} |\n", inner.join(" | "))
}

pub fn render_markdown<'a>(
    records: impl IntoIterator<Item = &'a Record>,
    title: &str,
    captured_at: DateTime<Local>,
) -> String {
    let mut out = format!(
        "# {title}\n\n采集时间: {}\n\n",
        captured_at.format("%Y-%m-%d %H:%M:%S")
    );
    out.push_str(&table_row(&TABLE_HEADER));
    out.push_str(&table_row(&["---"; 7]));
    for record in records {
        out.push_str(&table_row(&fields(record, table_time(record.open_time()))));
    }
    out
}

/// Seven tab-joined fields per record, no header. Values are written unescaped.
pub fn render_lines<'a>(records: impl IntoIterator<Item = &'a Record>) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&fields(record, record.open_time().to_string()).join("\t"));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kaiqu_core::{AdmissionPolicy, RawListing, TimeNormalizer};

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).single().unwrap()
    }

    fn record(name: &str, url: &str, time_text: &str) -> Record {
        let raw = RawListing {
            name: name.to_string(),
            url: url.to_string(),
            category: "1.76复古".to_string(),
            time_text: time_text.to_string(),
            min_spend: "30元".to_string(),
            description: "散人".to_string(),
            features: "高爆".to_string(),
        };
        Record::admit(&raw, &TimeNormalizer::new(now()), &AdmissionPolicy::table()).unwrap()
    }

    #[test]
    fn lines_have_seven_tab_fields_each() {
        let records = vec![
            record("龙城霸业", "http://lcby.example/", "10月20日/13:00"),
            record("至尊推荐", "http://vip.example/", "精品全天推荐"),
        ];
        let text = render_lines(&records);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert_eq!(line.split('\t').count(), 7);
        }
        let expected_ts = Local
            .with_ymd_and_hms(2026, 10, 20, 13, 0, 0)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(
            lines[0],
            format!("龙城霸业\thttp://lcby.example/\t1.76复古\t{expected_ts}\t30元\t散人\t高爆")
        );
        assert_eq!(lines[1].split('\t').nth(3), Some("精品全天推荐"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn empty_collection_renders_empty_lines_document() {
        assert_eq!(render_lines(&Vec::<Record>::new()), "");
    }

    #[test]
    fn markdown_has_title_capture_line_header_and_rows() {
        let records = vec![
            record("龙城霸业", "http://lcby.example/", "10月20日/13:00"),
            record("至尊推荐", "http://vip.example/", "精品全天推荐"),
        ];
        let text = render_markdown(&records, "开区信息采集结果", now());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# 开区信息采集结果");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "采集时间: 2026-10-19 12:00:00");
        assert_eq!(lines[3], "");
        assert_eq!(
            lines[4],
            "| 服务器名称 | 服务器链接 | 服务器类型 | 开区时间 | 最低消费 | 描述 | 特色 |"
        );
        assert_eq!(lines[5], "| --- | --- | --- | --- | --- | --- | --- |");
        assert_eq!(
            lines[6],
            "| 龙城霸业 | http://lcby.example/ | 1.76复古 | 2026-10-20 13:00 | 30元 | 散人 | 高爆 |"
        );
        assert!(lines[7].contains("| 精品全天推荐 |"));
        assert_eq!(lines.len(), 8);
    }
}

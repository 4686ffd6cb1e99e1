use cached::proc_macro::cached;
use opentelemetry::KeyValue;

const METER_NAME: &str = "powercut";

pub fn increment(name: &'static str, kv: &[(&str, &str)]) {
    add(name, 1, kv)
}

pub fn add(name: &'static str, value: u64, kv: &[(&str, &str)]) {
    if value == 0 {
        return;
    }

    let kv: Vec<KeyValue> = kv.iter().map(|(k, v)| as_kv(k, v)).collect();
    counter(name).add(value, &kv)
}

pub fn set(name: &'static str, value: f64, kv: &[(&str, &str)]) {
    let kv: Vec<KeyValue> = kv.iter().map(|(k, v)| as_kv(k, v)).collect();
    gauge(name).record(value, &kv)
}

fn as_kv(k: &str, v: &str) -> KeyValue {
    KeyValue::new(k.to_owned(), v.to_owned())
}

#[cached]
fn counter(name: &'static str) -> opentelemetry::metrics::Counter<u64> {
    opentelemetry::global::meter(METER_NAME).u64_counter(name).build()
}

#[cached]
fn gauge(name: &'static str) -> opentelemetry::metrics::Gauge<f64> {
    opentelemetry::global::meter(METER_NAME).f64_gauge(name).build()
}

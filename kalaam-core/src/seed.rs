//! Starter library copied into every new account.

use crate::model::{Category, Lyric, SubCategory};

/// Sample recording attached to the first lyrics of each sub-category
pub const SAMPLE_AUDIO_URL: &str = "https://www.soundhelix.com/examples/mp3/SoundHelix-Song-1.mp3";

/// Lyrics generated per sub-category
pub const LYRICS_PER_SUB_CATEGORY: u32 = 10;

/// Lyrics per sub-category that carry [`SAMPLE_AUDIO_URL`]
pub const LYRICS_WITH_AUDIO: u32 = 2;

const CATEGORIES: &[(&str, &str)] = &[
    ("1", "حمد باری تعالٰی"),
    ("2", "نعت رسول مقبول ﷺ"),
    ("3", "منقبتِ اہل بیت"),
    ("4", "منقبتِ اولیاء"),
    ("5", "سلام و درود"),
    ("6", "قطعات و رباعیات"),
];

// (id, category id, name, serial)
const SUB_CATEGORIES: &[(&str, &str, &str, u32)] = &[
    ("s1", "1", "اردو حمد", 1),
    ("s2", "1", "مناجات", 2),
    ("s3", "1", "حمدِ باری", 3),
    ("s19", "1", "ثنائے الہی", 4),
    ("s20", "1", "شکرِ خدا", 5),
    ("s4", "2", "اردو نعت", 1),
    ("s5", "2", "عربی نعت", 2),
    ("s6", "2", "فارسی نعت", 3),
    ("s21", "2", "نعتِ پاک (مشہور)", 4),
    ("s22", "2", "میلاد النبیؐ", 5),
    ("s7", "3", "شانِ علیؓ", 1),
    ("s8", "3", "شانِ حسینؓ", 2),
    ("s9", "3", "شانِ پنجتن پاک", 3),
    ("s23", "3", "شانِ زہرا سلام اللہ", 4),
    ("s24", "3", "شانِ حسنین کریمین", 5),
    ("s10", "4", "غوثِ اعظم", 1),
    ("s11", "4", "خواجہ غریب نواز", 2),
    ("s12", "4", "داتا گنج بخش", 3),
    ("s25", "4", "حضرت بلھے شاہ", 4),
    ("s26", "4", "وارث شاہ", 5),
    ("s13", "5", "درود و سلام", 1),
    ("s14", "5", "مستجاب سلام", 2),
    ("s15", "5", "سلامِ رضا", 3),
    ("s27", "5", "سلام بر مصطفیٰؐ", 4),
    ("s28", "5", "صوفیانہ کلام", 5),
    ("s16", "6", "اخلاقی قطعات", 1),
    ("s17", "6", "صوفیانہ رباعیات", 2),
    ("s18", "6", "متفرق اشعار", 3),
    ("s29", "6", "حکمت و دانائی", 4),
    ("s30", "6", "عشقِ حقیقی", 5),
];

const SAMPLE_VERSES: &str = "بند اول:
تیری قدرت کے نظارے ہیں زمانے بھر میں
تیری رحمت کے سہارے ہیں زمانے بھر میں

بند دوم:
کوئی تجھ سا نہیں اے مالکِ ارض و سما
تیرے قبضے میں ہے ہر ذرہ و ہر ایک فضا

بند سوم:
تیرے در کا میں گدا ہوں مری بگڑی بنا دے تو
اپنے فضل و کرم سے میرا دامن بھر دے تو

بند چہارم:
صبح اٹھ کر تیرا ہی نام لبوں پر آئے
شام ڈھلے بھی تری یاد ہی دل کو بھائے

بند پنجم:
ذکر سے تیرے ہی ملتی ہے سکونِ قلب کو راحت
تیری ہی بندگی ہے مومن کی اصل سعادت

بند ششم:
مجھ گنہگار کو بھی اپنا بنا لے میرے مولیٰ
خواب میں اپنا بھی جلوہ تو دکھا دے میرے مولیٰ";

#[must_use]
pub fn categories() -> Vec<Category> {
    CATEGORIES
        .iter()
        .zip(1u32..)
        .map(|(&(id, name), serial)| Category {
            id: id.to_string(),
            user_id: None,
            name: name.to_string(),
            serial,
        })
        .collect()
}

#[must_use]
pub fn sub_categories() -> Vec<SubCategory> {
    SUB_CATEGORIES
        .iter()
        .map(|&(id, category_id, name, serial)| SubCategory {
            id: id.to_string(),
            user_id: None,
            category_id: category_id.to_string(),
            name: name.to_string(),
            serial,
        })
        .collect()
}

#[must_use]
pub fn lyrics() -> Vec<Lyric> {
    SUB_CATEGORIES
        .iter()
        .flat_map(|&(sub_id, _, sub_name, _)| {
            (1..=LYRICS_PER_SUB_CATEGORY).map(move |i| Lyric {
                id: format!("l-{sub_id}-{i}"),
                user_id: None,
                sub_category_id: sub_id.to_string(),
                title: format!("{sub_name} - کلام {i}"),
                content: SAMPLE_VERSES.to_string(),
                serial: i,
                audio_url: (i <= LYRICS_WITH_AUDIO).then(|| SAMPLE_AUDIO_URL.to_string()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_seed_shape() {
        assert_eq!(categories().len(), 6);
        assert_eq!(sub_categories().len(), 30);
        assert_eq!(lyrics().len(), 300);
    }

    #[test]
    fn test_every_category_has_five_sub_categories() {
        let subs = sub_categories();
        for category in categories() {
            let count = subs.iter().filter(|s| s.category_id == category.id).count();
            assert_eq!(count, 5, "category {}", category.id);
        }
    }

    #[test]
    fn test_lyric_ids_unique_and_audio_on_first_two() {
        let all = lyrics();
        let ids: HashSet<_> = all.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids.len(), all.len());

        let first = all.iter().find(|l| l.id == "l-s1-1").unwrap();
        assert_eq!(first.static_audio(), Some(SAMPLE_AUDIO_URL));
        let third = all.iter().find(|l| l.id == "l-s1-3").unwrap();
        assert!(third.static_audio().is_none());
        assert_eq!(third.couplets().len(), 9);
    }
}

// src/reminders/message.rs

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::models::{DoctorInfo, PatientContact};

const GENERIC_DOCTOR: &str = "votre médecin";
const DEFAULT_SPECIALIZATION: &str = "Médecin";

/// Name shown for the doctor in a reminder, e.g. "Dr MUKWAMU B. Justin, Pédiatre".
pub fn doctor_display(doctor: Option<&DoctorInfo>) -> String {
    let Some(doctor) = doctor else {
        return GENERIC_DOCTOR.to_string();
    };

    if let Some(profile) = &doctor.profile {
        let display = profile.display_name.trim();
        if !display.is_empty() {
            let spec = profile.specialization.trim();
            return if !spec.is_empty() && !display.contains(spec) {
                format!("{display}, {spec}")
            } else {
                display.to_string()
            };
        }
    }

    let name = format!("{} {}", doctor.last_name.trim(), doctor.first_name.trim());
    let name = match name.trim() {
        "" => doctor.username.trim(),
        n => n,
    };

    match &doctor.profile {
        Some(profile) => {
            let spec = match profile.specialization.trim() {
                "" => DEFAULT_SPECIALIZATION,
                s => s,
            };
            format!("Dr {name}, {spec}")
        }
        None => format!("Dr {name}"),
    }
}

/// Footer inviting the patient to call the clinic. Empty without a number.
pub fn contact_line(clinic_phone: Option<&str>) -> String {
    match clinic_phone.map(str::trim).filter(|p| !p.is_empty()) {
        Some(phone) => format!("\nPour annuler ou reprogrammer, contactez-nous au {phone}."),
        None => String::new(),
    }
}

pub struct ReminderMessage<'a> {
    pub patient: &'a PatientContact,
    pub scheduled_at: DateTime<Utc>,
    pub doctor: &'a str,
    pub contact_line: &'a str,
}

impl ReminderMessage<'_> {
    /// Render the SMS body with date and time in the clinic's zone.
    pub fn render(&self, tz: Tz) -> String {
        let local = self.scheduled_at.with_timezone(&tz);
        format!(
            "Rappel de rendez-vous médical\n\
             \n\
             Bonjour {prenom} {nom},\n\
             Vous avez un rendez-vous prévu demain ({date}) à {heure} avec {docteur}.\n\
             \n\
             Merci de bien vouloir arriver 10 minutes à l'avance.\n\
             {contact}\n\
             Cordialement.",
            prenom = self.patient.first_name,
            nom = self.patient.last_name,
            date = local.format("%d/%m/%Y"),
            heure = local.format("%H:%M"),
            docteur = self.doctor,
            contact = self.contact_line,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DoctorProfile;

    fn doctor(first: &str, last: &str, profile: Option<DoctorProfile>) -> DoctorInfo {
        DoctorInfo {
            username: "drjustin".into(),
            first_name: first.into(),
            last_name: last.into(),
            profile,
        }
    }

    fn profile(display: &str, spec: &str) -> Option<DoctorProfile> {
        Some(DoctorProfile {
            display_name: display.into(),
            specialization: spec.into(),
        })
    }

    #[test]
    fn test_no_doctor_uses_generic_phrase() {
        assert_eq!(doctor_display(None), "votre médecin");
    }

    #[test]
    fn test_profile_display_name_wins() {
        let d = doctor("Justin", "Mukwamu", profile("Dr MUKWAMU B. Justin", "Pédiatre"));
        assert_eq!(doctor_display(Some(&d)), "Dr MUKWAMU B. Justin, Pédiatre");

        let d = doctor("Justin", "Mukwamu", profile("Dr MUKWAMU B. Justin, Pédiatre", "Pédiatre"));
        assert_eq!(doctor_display(Some(&d)), "Dr MUKWAMU B. Justin, Pédiatre");

        let d = doctor("Justin", "Mukwamu", profile("Dr Justin", ""));
        assert_eq!(doctor_display(Some(&d)), "Dr Justin");
    }

    #[test]
    fn test_constructed_name_fallbacks() {
        let d = doctor("Justin", "Mukwamu", None);
        assert_eq!(doctor_display(Some(&d)), "Dr Mukwamu Justin");

        let d = doctor("Justin", "Mukwamu", profile("", ""));
        assert_eq!(doctor_display(Some(&d)), "Dr Mukwamu Justin, Médecin");

        let d = doctor("Justin", "Mukwamu", profile("  ", "Cardiologue"));
        assert_eq!(doctor_display(Some(&d)), "Dr Mukwamu Justin, Cardiologue");

        let d = doctor("", "", None);
        assert_eq!(doctor_display(Some(&d)), "Dr drjustin");
    }

    #[test]
    fn test_contact_line() {
        assert_eq!(contact_line(None), "");
        assert_eq!(contact_line(Some("  ")), "");
        assert_eq!(
            contact_line(Some("+243 81 000 0000")),
            "\nPour annuler ou reprogrammer, contactez-nous au +243 81 000 0000."
        );
    }

    #[test]
    fn test_render_uses_clinic_local_time() {
        let patient = PatientContact {
            first_name: "Jean".into(),
            last_name: "Dupont".into(),
            phone: Some("0812345678".into()),
        };
        let msg = ReminderMessage {
            patient: &patient,
            // 09:30 UTC is 10:30 in Kinshasa
            scheduled_at: "2026-10-17T09:30:00Z".parse().unwrap(),
            doctor: "votre médecin",
            contact_line: "",
        }
        .render(chrono_tz::Africa::Kinshasa);

        assert!(msg.starts_with("Rappel de rendez-vous médical\n\nBonjour Jean Dupont,\n"));
        assert!(msg.contains("demain (17/10/2026) à 10:30 avec votre médecin."));
        assert!(msg.ends_with("l'avance.\n\nCordialement."));
    }
}
